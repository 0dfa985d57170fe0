use std::collections::HashMap;

use axum::extract::Query;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use kintone_core::config::{KintoneAuth, KintoneClientConfig};
use serde_json::{Value, json};

pub(crate) fn fake_kintone_config(base_url: &str) -> KintoneClientConfig {
    KintoneClientConfig {
        base_url: base_url.to_string(),
        auth: KintoneAuth::ApiToken("test-token".to_string()),
        basic_auth: None,
        https_proxy: None,
        pfx: None,
    }
}

fn app(id: u64) -> Value {
    json!({
        "appId": id.to_string(),
        "code": format!("APP{id}"),
        "name": format!("App {id}"),
        "description": "",
        "spaceId": null,
        "threadId": null,
        "createdAt": "2024-01-01T00:00:00.000Z",
        "creator": { "code": "admin", "name": "Administrator" },
        "modifiedAt": "2024-01-01T00:00:00.000Z",
        "modifier": { "code": "admin", "name": "Administrator" }
    })
}

fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "code": "GAIA_AP01",
            "id": "fake-error-id",
            "message": "The app does not exist."
        })),
    )
}

/// A kintone stand-in with three apps. App `404` does not exist.
pub(crate) async fn spawn_fake_kintone() -> String {
    let router = Router::new()
        .route(
            "/k/v1/apps.json",
            get(|Query(query): Query<HashMap<String, String>>| async move {
                let limit = query
                    .get("limit")
                    .and_then(|raw| raw.parse::<u64>().ok())
                    .unwrap_or(100);
                let offset = query
                    .get("offset")
                    .and_then(|raw| raw.parse::<u64>().ok())
                    .unwrap_or(0);
                let apps: Vec<Value> = (1..=3).skip(offset as usize).take(limit as usize).map(app).collect();
                Json(json!({ "apps": apps }))
            }),
        )
        .route(
            "/k/v1/app.json",
            get(|Query(query): Query<HashMap<String, String>>| async move {
                match query.get("id").map(String::as_str) {
                    Some("404") | None => Err(not_found()),
                    Some(id) => Ok(Json(app(id.parse().unwrap_or(1)))),
                }
            }),
        )
        .route(
            "/k/v1/app/form/fields.json",
            get(|| async {
                Json(json!({
                    "properties": {
                        "title": { "type": "SINGLE_LINE_TEXT", "code": "title", "label": "Title" }
                    },
                    "revision": "3"
                }))
            }),
        )
        .route(
            "/k/v1/records.json",
            get(|| async {
                Json(json!({
                    "records": [{ "title": { "type": "SINGLE_LINE_TEXT", "value": "hello" } }],
                    "totalCount": "1"
                }))
            })
            .post(|Json(body): Json<Value>| async move {
                let count = body["records"].as_array().map(Vec::len).unwrap_or(0);
                let ids: Vec<String> = (0..count).map(|i| (100 + i).to_string()).collect();
                let revisions: Vec<String> = (0..count).map(|_| "1".to_string()).collect();
                Json(json!({ "ids": ids, "revisions": revisions }))
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake kintone");
    let addr = listener.local_addr().expect("fake kintone address");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("fake kintone server");
    });
    format!("http://{addr}")
}
