use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A user reference as kintone returns it on app metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRef {
    pub code: String,
    pub name: String,
}

/// App settings from `GET /k/v1/app.json` and `GET /k/v1/apps.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct App {
    pub app_id: String,
    #[serde(default)]
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub space_id: Option<String>,
    pub thread_id: Option<String>,
    pub created_at: String,
    pub creator: UserRef,
    pub modified_at: String,
    pub modifier: UserRef,
}

/// Filters for `GET /k/v1/apps.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetAppsParams {
    pub ids: Option<Vec<String>>,
    pub codes: Option<Vec<String>>,
    pub name: Option<String>,
    pub space_ids: Option<Vec<String>>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl GetAppsParams {
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        push_indexed(&mut pairs, "ids", self.ids.as_deref());
        push_indexed(&mut pairs, "codes", self.codes.as_deref());
        if let Some(name) = &self.name {
            pairs.push(("name".to_string(), name.clone()));
        }
        push_indexed(&mut pairs, "spaceIds", self.space_ids.as_deref());
        if let Some(offset) = self.offset {
            pairs.push(("offset".to_string(), offset.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAppsResponse {
    pub apps: Vec<App>,
}

/// Response of `GET /k/v1/app/form/fields.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormFieldsResponse {
    pub properties: Map<String, Value>,
    pub revision: String,
}

/// Filters for `GET /k/v1/records.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetRecordsParams {
    pub app: String,
    pub query: Option<String>,
    pub fields: Option<Vec<String>>,
    pub total_count: bool,
}

impl GetRecordsParams {
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("app".to_string(), self.app.clone())];
        if let Some(query) = &self.query {
            pairs.push(("query".to_string(), query.clone()));
        }
        push_indexed(&mut pairs, "fields", self.fields.as_deref());
        if self.total_count {
            pairs.push(("totalCount".to_string(), "true".to_string()));
        }
        pairs
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetRecordsResponse {
    pub records: Vec<Map<String, Value>>,
    #[serde(default)]
    pub total_count: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRecordsRequest {
    pub app: String,
    pub records: Vec<Map<String, Value>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRecordsResponse {
    pub ids: Vec<String>,
    pub revisions: Vec<String>,
}

/// kintone encodes array query parameters as `key[0]=a&key[1]=b`.
fn push_indexed(pairs: &mut Vec<(String, String)>, key: &str, values: Option<&[String]>) {
    let Some(values) = values else {
        return;
    };
    for (index, value) in values.iter().enumerate() {
        pairs.push((format!("{key}[{index}]"), value.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_apps_query_uses_indexed_arrays() {
        let params = GetAppsParams {
            ids: Some(vec!["1".into(), "7".into()]),
            space_ids: Some(vec!["3".into()]),
            offset: Some(0),
            limit: Some(5),
            ..Default::default()
        };
        assert_eq!(
            params.to_query(),
            vec![
                ("ids[0]".to_string(), "1".to_string()),
                ("ids[1]".to_string(), "7".to_string()),
                ("spaceIds[0]".to_string(), "3".to_string()),
                ("offset".to_string(), "0".to_string()),
                ("limit".to_string(), "5".to_string()),
            ]
        );
    }

    #[test]
    fn app_accepts_null_space_and_thread() {
        let app: App = serde_json::from_value(json!({
            "appId": "12",
            "code": "",
            "name": "Customers",
            "description": "",
            "spaceId": null,
            "threadId": null,
            "createdAt": "2024-01-01T00:00:00.000Z",
            "creator": { "code": "alice", "name": "Alice" },
            "modifiedAt": "2024-02-01T00:00:00.000Z",
            "modifier": { "code": "bob", "name": "Bob" }
        }))
        .unwrap();
        assert_eq!(app.app_id, "12");
        assert!(app.space_id.is_none());
        assert_eq!(app.modifier.name, "Bob");
    }

    #[test]
    fn get_records_query_only_sets_total_count_when_requested() {
        let params = GetRecordsParams {
            app: "5".into(),
            query: Some("status = \"open\"".into()),
            ..Default::default()
        };
        let pairs = params.to_query();
        assert!(pairs.iter().all(|(k, _)| k != "totalCount"));
        assert_eq!(pairs[0], ("app".to_string(), "5".to_string()));
    }
}
