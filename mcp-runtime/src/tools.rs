use kintone_core::KintoneClient;
use kintone_core::apps::{AddRecordsRequest, GetAppsParams, GetRecordsParams};
use kintone_core::error::{ClientError, codes};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

const UNKNOWN_TOOL: &str = "unknown_tool";

const MAX_FILTER_ITEMS: usize = 100;
const MAX_CODE_CHARS: usize = 64;
const MAX_NAME_CHARS: usize = 64;
const MAX_RECORDS_PER_CALL: usize = 100;
const FORM_LANGS: [&str; 5] = ["default", "en", "zh", "ja", "user"];

#[derive(Debug, Clone)]
pub struct ToolError {
    pub code: String,
    pub message: String,
    pub field: Option<String>,
    pub details: Option<Value>,
}

impl ToolError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            field: None,
            details: None,
        }
    }

    fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::new(codes::VALIDATION_FAILED, message).with_field(field)
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Bad tool name or arguments. Reported as a JSON-RPC error rather than a tool result.
    pub fn is_protocol_error(&self) -> bool {
        self.code == codes::VALIDATION_FAILED || self.code == UNKNOWN_TOOL
    }

    pub fn to_value(&self) -> Value {
        let mut payload = json!({
            "error": self.code,
            "message": self.message
        });
        if let Some(field) = &self.field {
            payload["field"] = Value::String(field.clone());
        }
        if let Some(details) = &self.details {
            payload["details"] = details.clone();
        }
        payload
    }

    /// `tools/call` result for a failure the model should see.
    pub fn to_call_result(&self) -> Value {
        json!({
            "content": [{ "type": "text", "text": self.message }],
            "isError": true
        })
    }
}

impl From<ClientError> for ToolError {
    fn from(err: ClientError) -> Self {
        match &err {
            ClientError::Api {
                status, code, id, ..
            } => ToolError::new(codes::KINTONE_API_ERROR, err.to_string()).with_details(json!({
                "status": status,
                "code": code,
                "id": id
            })),
            ClientError::Transport(_) => {
                ToolError::new(codes::KINTONE_UNREACHABLE, err.to_string())
                    .with_details(json!({ "status": err.status() }))
            }
            _ => ToolError::new(codes::CLIENT_CONFIG_ERROR, err.to_string()),
        }
    }
}

#[derive(Debug)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
    pub output_schema: Value,
}

impl ToolDefinition {
    fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "title": self.title,
            "description": self.description,
            "inputSchema": self.input_schema,
            "outputSchema": self.output_schema
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub structured: Value,
}

impl ToolOutput {
    pub fn to_call_result(&self) -> Value {
        let text = serde_json::to_string_pretty(&self.structured)
            .unwrap_or_else(|_| self.structured.to_string());
        json!({
            "structuredContent": self.structured,
            "content": [{ "type": "text", "text": text }]
        })
    }
}

/// Tools exposed by the server, in listing order.
#[derive(Debug)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::kintone()
    }
}

impl ToolRegistry {
    pub fn kintone() -> Self {
        let tools = tool_definitions();
        debug_assert!(
            tools
                .iter()
                .enumerate()
                .all(|(i, t)| tools[..i].iter().all(|o| o.name != t.name)),
            "tool names must be unique"
        );
        Self { tools }
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tools.iter().map(|tool| tool.name)
    }

    /// `tools/list` result.
    pub fn list(&self) -> Value {
        json!({
            "tools": self.tools.iter().map(ToolDefinition::to_value).collect::<Vec<_>>()
        })
    }

    /// Resolves the tool and validates its arguments without calling kintone.
    pub fn prepare(&self, name: &str, arguments: Value) -> Result<ToolInvocation, ToolError> {
        let arguments = match arguments {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        match name {
            "kintone-get-apps" => Ok(ToolInvocation::GetApps(
                parse_args::<GetAppsInput>(name, arguments)?.validate()?,
            )),
            "kintone-get-app" => Ok(ToolInvocation::GetApp(
                parse_args::<GetAppInput>(name, arguments)?.validate()?,
            )),
            "kintone-get-form-fields" => Ok(ToolInvocation::GetFormFields(
                parse_args::<GetFormFieldsInput>(name, arguments)?.validate()?,
            )),
            "kintone-get-records" => Ok(ToolInvocation::GetRecords(
                parse_args::<GetRecordsInput>(name, arguments)?.validate()?,
            )),
            "kintone-add-records" => Ok(ToolInvocation::AddRecords(
                parse_args::<AddRecordsInput>(name, arguments)?.validate()?,
            )),
            other => Err(
                ToolError::new(UNKNOWN_TOOL, format!("Unknown tool: {other}")).with_field("name"),
            ),
        }
    }
}

fn parse_args<T: DeserializeOwned>(tool: &str, arguments: Value) -> Result<T, ToolError> {
    serde_json::from_value(arguments).map_err(|err| {
        ToolError::new(
            codes::VALIDATION_FAILED,
            format!("Invalid arguments for {tool}: {err}"),
        )
        .with_field("arguments")
    })
}

/// A validated tool call, ready to run against kintone.
#[derive(Debug, Clone)]
pub enum ToolInvocation {
    GetApps(GetAppsParams),
    GetApp(GetAppInput),
    GetFormFields(GetFormFieldsInput),
    GetRecords(GetRecordsParams),
    AddRecords(AddRecordsRequest),
}

impl ToolInvocation {
    pub fn name(&self) -> &'static str {
        match self {
            ToolInvocation::GetApps(_) => "kintone-get-apps",
            ToolInvocation::GetApp(_) => "kintone-get-app",
            ToolInvocation::GetFormFields(_) => "kintone-get-form-fields",
            ToolInvocation::GetRecords(_) => "kintone-get-records",
            ToolInvocation::AddRecords(_) => "kintone-add-records",
        }
    }

    pub async fn execute(self, client: &KintoneClient) -> Result<ToolOutput, ToolError> {
        let structured = match self {
            ToolInvocation::GetApps(params) => {
                let response = client.get_apps(&params).await?;
                tracing::debug!(apps = response.apps.len(), "kintone-get-apps completed");
                json!({ "apps": response.apps })
            }
            ToolInvocation::GetApp(input) => json!(client.get_app(&input.app_id).await?),
            ToolInvocation::GetFormFields(input) => json!(
                client
                    .get_form_fields(&input.app, input.lang.as_deref())
                    .await?
            ),
            ToolInvocation::GetRecords(params) => {
                let response = client.get_records(&params).await?;
                json!({
                    "records": response.records,
                    "totalCount": response.total_count
                })
            }
            ToolInvocation::AddRecords(request) => json!(client.add_records(&request).await?),
        };
        Ok(ToolOutput { structured })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct GetAppsInput {
    ids: Option<Vec<String>>,
    codes: Option<Vec<String>>,
    name: Option<String>,
    space_ids: Option<Vec<String>>,
    offset: Option<u64>,
    limit: Option<u64>,
}

impl GetAppsInput {
    fn validate(self) -> Result<GetAppsParams, ToolError> {
        check_max_items("ids", self.ids.as_deref())?;
        check_max_items("codes", self.codes.as_deref())?;
        check_max_items("spaceIds", self.space_ids.as_deref())?;
        let long_code = self
            .codes
            .iter()
            .flatten()
            .any(|code| code.chars().count() > MAX_CODE_CHARS);
        if long_code {
            return Err(ToolError::validation(
                "codes",
                format!("codes: each app code must be at most {MAX_CODE_CHARS} characters"),
            ));
        }
        if self
            .name
            .as_ref()
            .is_some_and(|name| name.chars().count() > MAX_NAME_CHARS)
        {
            return Err(ToolError::validation(
                "name",
                format!("name: must be at most {MAX_NAME_CHARS} characters"),
            ));
        }
        let limit = self.limit.unwrap_or(100);
        if !(1..=100).contains(&limit) {
            return Err(ToolError::validation(
                "limit",
                "limit: must be between 1 and 100",
            ));
        }
        Ok(GetAppsParams {
            ids: self.ids,
            codes: self.codes,
            name: self.name,
            space_ids: self.space_ids,
            offset: Some(self.offset.unwrap_or(0)),
            limit: Some(limit),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetAppInput {
    pub app_id: String,
}

impl GetAppInput {
    fn validate(self) -> Result<Self, ToolError> {
        require_id("appId", &self.app_id)?;
        Ok(self)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GetFormFieldsInput {
    pub app: String,
    pub lang: Option<String>,
}

impl GetFormFieldsInput {
    fn validate(self) -> Result<Self, ToolError> {
        require_id("app", &self.app)?;
        if self
            .lang
            .as_deref()
            .is_some_and(|lang| !FORM_LANGS.contains(&lang))
        {
            return Err(ToolError::validation(
                "lang",
                format!("lang: must be one of {}", FORM_LANGS.join(", ")),
            ));
        }
        Ok(self)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct GetRecordsInput {
    app: String,
    query: Option<String>,
    fields: Option<Vec<String>>,
    total_count: Option<bool>,
}

impl GetRecordsInput {
    fn validate(self) -> Result<GetRecordsParams, ToolError> {
        require_id("app", &self.app)?;
        check_max_items("fields", self.fields.as_deref())?;
        Ok(GetRecordsParams {
            app: self.app,
            query: self.query.filter(|q| !q.trim().is_empty()),
            fields: self.fields,
            total_count: self.total_count.unwrap_or(false),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct AddRecordsInput {
    app: String,
    records: Vec<Map<String, Value>>,
}

impl AddRecordsInput {
    fn validate(self) -> Result<AddRecordsRequest, ToolError> {
        require_id("app", &self.app)?;
        if self.records.is_empty() || self.records.len() > MAX_RECORDS_PER_CALL {
            return Err(ToolError::validation(
                "records",
                format!("records: must contain between 1 and {MAX_RECORDS_PER_CALL} records"),
            ));
        }
        Ok(AddRecordsRequest {
            app: self.app,
            records: self.records,
        })
    }
}

fn require_id(field: &str, value: &str) -> Result<(), ToolError> {
    if value.trim().is_empty() {
        return Err(ToolError::validation(
            field,
            format!("{field}: must not be empty"),
        ));
    }
    Ok(())
}

fn check_max_items(field: &str, values: Option<&[String]>) -> Result<(), ToolError> {
    match values {
        Some(values) if values.len() > MAX_FILTER_ITEMS => Err(ToolError::validation(
            field,
            format!("{field}: at most {MAX_FILTER_ITEMS} items allowed"),
        )),
        _ => Ok(()),
    }
}

fn user_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "code": { "type": "string" },
            "name": { "type": "string" }
        },
        "required": ["code", "name"]
    })
}

fn app_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "appId": { "type": "string", "description": "The app ID" },
            "code": { "type": "string", "description": "The app code (empty string if not set)" },
            "name": { "type": "string", "description": "The app name" },
            "description": { "type": "string", "description": "The app description (empty string if not set)" },
            "spaceId": { "type": ["string", "null"], "description": "The space ID (null if not in a space)" },
            "threadId": { "type": ["string", "null"], "description": "The thread ID (null if not in a space)" },
            "createdAt": { "type": "string" },
            "creator": user_schema(),
            "modifiedAt": { "type": "string" },
            "modifier": user_schema()
        },
        "required": [
            "appId", "code", "name", "description", "spaceId", "threadId",
            "createdAt", "creator", "modifiedAt", "modifier"
        ]
    })
}

fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "kintone-get-apps",
            title: "Get Apps",
            description: "Get multiple app settings from kintone",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "ids": {
                        "type": "array",
                        "items": { "type": "string" },
                        "maxItems": MAX_FILTER_ITEMS,
                        "description": "Array of app IDs (numeric values as strings, max 100)"
                    },
                    "codes": {
                        "type": "array",
                        "items": { "type": "string", "maxLength": MAX_CODE_CHARS },
                        "maxItems": MAX_FILTER_ITEMS,
                        "description": "Array of app codes (max 64 characters each)"
                    },
                    "name": {
                        "type": "string",
                        "maxLength": MAX_NAME_CHARS,
                        "description": "App name for partial match search"
                    },
                    "spaceIds": {
                        "type": "array",
                        "items": { "type": "string" },
                        "maxItems": MAX_FILTER_ITEMS,
                        "description": "Array of space IDs (numeric values as strings, max 100)"
                    },
                    "offset": {
                        "type": "integer",
                        "minimum": 0,
                        "default": 0,
                        "description": "Offset for pagination (default: 0)"
                    },
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "maximum": 100,
                        "default": 100,
                        "description": "Number of apps to retrieve (1-100, default: 100)"
                    }
                },
                "additionalProperties": false
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "apps": { "type": "array", "items": app_schema() }
                },
                "required": ["apps"]
            }),
        },
        ToolDefinition {
            name: "kintone-get-app",
            title: "Get App",
            description: "Get the settings of a single kintone app",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "appId": { "type": "string", "description": "The app ID" }
                },
                "required": ["appId"],
                "additionalProperties": false
            }),
            output_schema: app_schema(),
        },
        ToolDefinition {
            name: "kintone-get-form-fields",
            title: "Get Form Fields",
            description: "Get the form field definitions of a kintone app",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "app": { "type": "string", "description": "The app ID" },
                    "lang": {
                        "type": "string",
                        "enum": FORM_LANGS,
                        "description": "Localization of field names"
                    }
                },
                "required": ["app"],
                "additionalProperties": false
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "properties": { "type": "object", "description": "Field definitions keyed by field code" },
                    "revision": { "type": "string" }
                },
                "required": ["properties", "revision"]
            }),
        },
        ToolDefinition {
            name: "kintone-get-records",
            title: "Get Records",
            description: "Get records from a kintone app using a kintone query",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "app": { "type": "string", "description": "The app ID" },
                    "query": { "type": "string", "description": "kintone query string, e.g. status = \"open\" limit 10" },
                    "fields": {
                        "type": "array",
                        "items": { "type": "string" },
                        "maxItems": MAX_FILTER_ITEMS,
                        "description": "Field codes to include in the response"
                    },
                    "totalCount": { "type": "boolean", "description": "Return the total match count" }
                },
                "required": ["app"],
                "additionalProperties": false
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "records": { "type": "array", "items": { "type": "object" } },
                    "totalCount": { "type": ["string", "null"] }
                },
                "required": ["records", "totalCount"]
            }),
        },
        ToolDefinition {
            name: "kintone-add-records",
            title: "Add Records",
            description: "Add up to 100 records to a kintone app",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "app": { "type": "string", "description": "The app ID" },
                    "records": {
                        "type": "array",
                        "minItems": 1,
                        "maxItems": MAX_RECORDS_PER_CALL,
                        "items": {
                            "type": "object",
                            "description": "Field code to { \"value\": ... } map"
                        }
                    }
                },
                "required": ["app", "records"],
                "additionalProperties": false
            }),
            output_schema: json!({
                "type": "object",
                "properties": {
                    "ids": { "type": "array", "items": { "type": "string" } },
                    "revisions": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["ids", "revisions"]
            }),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{fake_kintone_config, spawn_fake_kintone};

    #[test]
    fn registry_lists_every_tool_once_with_schemas() {
        let registry = ToolRegistry::kintone();
        let listed = registry.list();
        let tools = listed["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 5);

        let mut names: Vec<&str> = registry.names().collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 5);

        for tool in tools {
            assert_eq!(tool["inputSchema"]["type"], "object");
            assert_eq!(tool["outputSchema"]["type"], "object");
            assert!(tool["title"].is_string());
        }
    }

    #[test]
    fn get_apps_defaults_offset_and_limit() {
        let registry = ToolRegistry::kintone();
        let ToolInvocation::GetApps(params) =
            registry.prepare("kintone-get-apps", Value::Null).unwrap()
        else {
            panic!("expected get-apps invocation");
        };
        assert_eq!(params.offset, Some(0));
        assert_eq!(params.limit, Some(100));
    }

    #[test]
    fn get_apps_rejects_out_of_range_limit() {
        let registry = ToolRegistry::kintone();
        let err = registry
            .prepare("kintone-get-apps", json!({ "limit": 0 }))
            .unwrap_err();
        assert!(err.is_protocol_error());
        assert_eq!(err.field.as_deref(), Some("limit"));

        let err = registry
            .prepare("kintone-get-apps", json!({ "limit": 101 }))
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("limit"));
    }

    #[test]
    fn get_apps_rejects_long_codes_and_too_many_ids() {
        let registry = ToolRegistry::kintone();
        let err = registry
            .prepare("kintone-get-apps", json!({ "codes": ["x".repeat(65)] }))
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("codes"));

        let ids: Vec<String> = (0..101).map(|i| i.to_string()).collect();
        let err = registry
            .prepare("kintone-get-apps", json!({ "ids": ids }))
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("ids"));
    }

    #[test]
    fn unknown_fields_and_tools_are_protocol_errors() {
        let registry = ToolRegistry::kintone();
        let err = registry
            .prepare("kintone-get-apps", json!({ "bogus": true }))
            .unwrap_err();
        assert!(err.is_protocol_error());
        assert!(err.message.contains("bogus"));

        let err = registry.prepare("kintone-delete-app", json!({})).unwrap_err();
        assert!(err.is_protocol_error());
        assert_eq!(err.code, UNKNOWN_TOOL);
    }

    #[test]
    fn add_records_requires_between_one_and_hundred() {
        let registry = ToolRegistry::kintone();
        let err = registry
            .prepare("kintone-add-records", json!({ "app": "1", "records": [] }))
            .unwrap_err();
        assert_eq!(err.field.as_deref(), Some("records"));
    }

    #[test]
    fn output_renders_structured_content_and_pretty_text() {
        let output = ToolOutput {
            structured: json!({ "apps": [] }),
        };
        let result = output.to_call_result();
        assert_eq!(result["structuredContent"], json!({ "apps": [] }));
        assert_eq!(result["content"][0]["type"], "text");
        assert_eq!(result["content"][0]["text"], "{\n  \"apps\": []\n}");
    }

    #[tokio::test]
    async fn get_apps_executes_against_kintone() {
        let base = spawn_fake_kintone().await;
        let client = KintoneClient::new(&fake_kintone_config(&base)).unwrap();
        let invocation = ToolRegistry::kintone()
            .prepare("kintone-get-apps", json!({ "limit": 2 }))
            .unwrap();
        let output = invocation.execute(&client).await.unwrap();
        let apps = output.structured["apps"].as_array().unwrap();
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0]["appId"], "1");
        assert!(apps[0]["spaceId"].is_null());
    }

    #[tokio::test]
    async fn kintone_errors_become_tool_errors() {
        let base = spawn_fake_kintone().await;
        let client = KintoneClient::new(&fake_kintone_config(&base)).unwrap();
        let invocation = ToolRegistry::kintone()
            .prepare("kintone-get-app", json!({ "appId": "404" }))
            .unwrap();
        let err = invocation.execute(&client).await.unwrap_err();
        assert!(!err.is_protocol_error());
        assert_eq!(err.code, codes::KINTONE_API_ERROR);
        assert_eq!(err.details.as_ref().unwrap()["code"], "GAIA_AP01");
        assert_eq!(err.to_call_result()["isError"], true);
    }

    #[tokio::test]
    async fn unreachable_kintone_is_a_tool_error_without_status() {
        let client = KintoneClient::new(&fake_kintone_config("http://127.0.0.1:9")).unwrap();
        let invocation = ToolRegistry::kintone()
            .prepare("kintone-get-apps", json!({}))
            .unwrap();
        let err = invocation.execute(&client).await.unwrap_err();
        assert!(!err.is_protocol_error());
        assert_eq!(err.code, codes::KINTONE_UNREACHABLE);
        assert!(err.details.as_ref().unwrap()["status"].is_null());
    }
}
