//! HTTP surface tests driven through the router with `oneshot`.

mod common;

use common::{TestHierarchy, ACTOR};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use service_core::axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use service_core::middleware::REQUEST_ID_HEADER;
use tower::ServiceExt;

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-actor-id", ACTOR.to_string());
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn create(app: &Router, parent: Option<i64>, code: &str) -> Value {
    let (status, body) = send(
        app,
        "POST",
        "/hierarchies/departments/nodes",
        Some(json!({ "parent_id": parent, "attributes": { "name": code, "code": code } })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    body
}

#[tokio::test]
async fn create_and_read_back_a_node() {
    let t = TestHierarchy::new();
    let app = t.router();

    let root = create(&app, None, "HQ").await;
    assert_eq!(root["level"], 1);
    assert_eq!(root["path"], "");
    assert_eq!(root["status"], "enabled");

    let child = create(&app, root["id"].as_i64(), "OPS").await;
    assert_eq!(child["path"], format!("/{}", root["id"]));

    let (status, body) = send(&app, "GET", &format!("/hierarchies/departments/nodes/{}", child["id"]), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attributes"]["code"], "OPS");

    let (status, body) = send(&app, "GET", "/hierarchies/departments/roots", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["kind"], "departments");
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn mutations_require_an_actor() {
    let t = TestHierarchy::new();
    let app = t.router();

    let request = Request::builder()
        .method("POST")
        .uri("/hierarchies/departments/nodes")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "attributes": { "name": "HQ", "code": "HQ" } }).to_string(),
        ))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn reads_do_not_need_an_actor() {
    let t = TestHierarchy::new();
    let app = t.router();
    let root = create(&app, None, "HQ").await;

    for uri in [
        format!("/hierarchies/departments/nodes/{}", root["id"]),
        "/hierarchies/departments/roots".to_string(),
        "/hierarchies/departments/tree".to_string(),
    ] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{}", uri);
    }
}

#[tokio::test]
async fn unknown_kind_is_not_found() {
    let t = TestHierarchy::new();
    let (status, _) = send(&t.router(), "GET", "/hierarchies/widgets/roots", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn structural_rejections_carry_a_reason_code() {
    let t = TestHierarchy::new();
    let app = t.router();
    let a = create(&app, None, "A").await;
    let b = create(&app, a["id"].as_i64(), "B").await;

    let (status, body) = send(&app, "DELETE", &format!("/hierarchies/departments/nodes/{}", a["id"]), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["reason"], "has_children");

    let (status, body) = send(
        &app,
        "POST",
        &format!("/hierarchies/departments/nodes/{}/move", a["id"]),
        Some(json!({ "parent_id": b["id"] })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["reason"], "cycle");

    let (status, body) = send(
        &app,
        "POST",
        "/hierarchies/departments/nodes",
        Some(json!({ "attributes": { "name": "dup", "code": "A" } })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["reason"], "duplicate_key");
}

#[tokio::test]
async fn move_then_query_the_tree() {
    let t = TestHierarchy::new();
    let app = t.router();
    let a = create(&app, None, "A").await;
    let b = create(&app, a["id"].as_i64(), "B").await;
    let c = create(&app, b["id"].as_i64(), "C").await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/hierarchies/departments/nodes/{}/move", b["id"]),
        Some(json!({ "parent_id": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["moved"], true);
    assert_eq!(body["descendants_rewritten"], 1);

    let (_, body) = send(&app, "GET", &format!("/hierarchies/departments/nodes/{}/ancestors", c["id"]), None).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["nodes"][0]["id"], b["id"]);

    let (status, body) = send(&app, "GET", "/hierarchies/departments/tree?enabled_only=true", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["roots"].as_array().map(Vec::len), Some(2));
    assert_eq!(body["roots"][1]["children"][0]["id"], c["id"]);

    let (status, body) = send(&app, "GET", "/hierarchies/departments/tree/flat", None).await;
    assert_eq!(status, StatusCode::OK);
    let listed: Vec<(Value, Value)> = body["nodes"]
        .as_array()
        .map(|nodes| nodes.iter().map(|n| (n["id"].clone(), n["depth"].clone())).collect())
        .unwrap_or_default();
    assert_eq!(
        listed,
        vec![
            (a["id"].clone(), json!(1)),
            (b["id"].clone(), json!(1)),
            (c["id"].clone(), json!(2)),
        ]
    );

    let (status, body) = send(&app, "GET", "/hierarchies/departments/integrity", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["checked"], 3);
    assert_eq!(body["issues"], json!([]));
}

#[tokio::test]
async fn status_sort_order_and_attribute_updates() {
    let t = TestHierarchy::new();
    let app = t.router();
    let r = create(&app, None, "R").await;
    let x = create(&app, r["id"].as_i64(), "X").await;
    let y = create(&app, r["id"].as_i64(), "Y").await;

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/hierarchies/departments/nodes/{}/status", x["id"]),
        Some(json!({ "status": "disabled" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "disabled");

    let (status, body) = send(
        &app,
        "PUT",
        &format!("/hierarchies/departments/nodes/{}/sort-order", x["id"]),
        Some(json!({ "sort_order": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["swapped_with"], y["id"]);

    let (status, _) = send(
        &app,
        "PUT",
        &format!("/hierarchies/departments/nodes/{}/sort-order", x["id"]),
        Some(json!({ "sort_order": -1 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = send(
        &app,
        "PATCH",
        &format!("/hierarchies/departments/nodes/{}", y["id"]),
        Some(json!({ "attributes": { "name": "Yankee", "code": "Y" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["attributes"]["name"], "Yankee");

    let (status, _) = send(
        &app,
        "PATCH",
        &format!("/hierarchies/departments/nodes/{}", y["id"]),
        Some(json!({ "attributes": { "name": "no code" } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn delete_check_restore_and_batch_delete() {
    let t = TestHierarchy::new();
    let app = t.router();
    let r = create(&app, None, "R").await;
    let a = create(&app, r["id"].as_i64(), "A").await;

    let (status, body) = send(&app, "GET", &format!("/hierarchies/departments/nodes/{}/deletion-check", r["id"]), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["blockers"], json!([{ "reason": "has_children", "count": 1 }]));

    let (status, _) = send(&app, "DELETE", &format!("/hierarchies/departments/nodes/{}", a["id"]), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(&app, "POST", &format!("/hierarchies/departments/nodes/{}/restore", a["id"]), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], false);

    let (status, body) = send(
        &app,
        "POST",
        "/hierarchies/departments/nodes/batch-delete",
        Some(json!({ "ids": [r["id"], a["id"]] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], json!([a["id"], r["id"]]));
    assert_eq!(body["failed"], json!([]));

    let (status, body) = send(&app, "GET", "/hierarchies/departments/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["node_count"], 0);
}

#[tokio::test]
async fn health_metrics_and_request_ids() {
    let t = TestHierarchy::new();
    let app = t.router();

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");

    create(&app, None, "M").await;
    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("hierarchy_mutations_total"));
}
