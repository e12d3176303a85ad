//! End-to-end through the HTTP surface: sync an automation, post events, read history.

use axum::{extract::State, http::Uri, routing::any, Router};
use radflow::{config::Config, server::create_app_with_pool};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Action target recording request paths
async fn spawn_target() -> (String, Arc<Mutex<Vec<String>>>) {
    let paths: Arc<Mutex<Vec<String>>> = Arc::default();
    let app = Router::new()
        .route(
            "/{*path}",
            any(|State(paths): State<Arc<Mutex<Vec<String>>>>, uri: Uri| async move {
                paths.lock().unwrap().push(uri.path().to_string());
                "ok"
            }),
        )
        .with_state(paths.clone());
    (serve(app).await, paths)
}

async fn spawn_engine() -> String {
    let pool = radflow::db::connect_in_memory().await.unwrap();
    let app = create_app_with_pool(Config::default(), pool).await.unwrap();
    serve(app).await
}

fn notify_automation(target: &str) -> Value {
    json!({
        "tenant_id": "tenant-a",
        "name": "Expiry notice",
        "trigger_type": "user-expired",
        "status": "active",
        "version": 2,
        "graph": {
            "nodes": [
                { "id": "t", "kind": "trigger", "subtype": "user-expired" },
                {
                    "id": "send",
                    "kind": "action",
                    "subtype": "http-request",
                    "config": { "method": "POST", "url": format!("{}/notify/{{{{event.username}}}}", target) }
                }
            ],
            "edges": [ { "source": "t", "target": "send" } ]
        }
    })
}

fn expired_event() -> Value {
    json!({
        "trigger_type": "user-expired",
        "tenant_id": "tenant-a",
        "entity_reference": "u-1",
        "context": { "username": "john" }
    })
}

#[tokio::test]
async fn event_to_history_round_trip() {
    let (target, paths) = spawn_target().await;
    let engine = spawn_engine().await;
    let client = reqwest::Client::new();

    let health = client.get(format!("{}/healthz", engine)).send().await.unwrap();
    assert_eq!(health.text().await.unwrap(), "ok");

    let synced = client
        .put(format!("{}/api/automations/notify", engine))
        .json(&notify_automation(&target))
        .send()
        .await
        .unwrap();
    assert_eq!(synced.status().as_u16(), 200);

    let dispatched: Value = client
        .post(format!("{}/api/events", engine))
        .json(&expired_event())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(dispatched["matched"], 1);
    assert_eq!(dispatched["runs"][0]["status"], "completed");
    assert_eq!(dispatched["runs"][0]["automation_version"], 2);
    assert_eq!(paths.lock().unwrap().clone(), vec!["/notify/john".to_string()]);

    let run_id = dispatched["runs"][0]["id"].as_str().unwrap().to_string();
    let run: Value = client
        .get(format!("{}/api/executions/{}", engine, run_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(run["steps"].as_array().unwrap().len(), 2);
    assert_eq!(run["steps"][1]["http"]["url"], format!("{}/notify/john", target));

    let tested: Value = client
        .post(format!("{}/api/automations/notify/test", engine))
        .json(&json!({ "entity_reference": "u-2", "context": { "username": "jane" } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tested["status"], "completed");

    let history: Value = client
        .get(format!("{}/api/automations/notify/executions?limit=10", engine))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let executions = history["executions"].as_array().unwrap();
    assert_eq!(executions.len(), 2);
    assert_eq!(executions[0]["entity_reference"], "u-2");
}

#[tokio::test]
async fn rejects_bad_input() {
    let (target, _paths) = spawn_target().await;
    let engine = spawn_engine().await;
    let client = reqwest::Client::new();

    let mut unknown = expired_event();
    unknown["trigger_type"] = json!("user-teleported");
    let response = client
        .post(format!("{}/api/events", engine))
        .json(&unknown)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    let mut invalid = notify_automation(&target);
    invalid["graph"]["edges"] = json!([{ "source": "t", "target": "nowhere" }]);
    let response = client
        .put(format!("{}/api/automations/broken", engine))
        .json(&invalid)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 422);

    let response = client
        .get(format!("{}/api/executions/missing", engine))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);

    let response = client
        .post(format!("{}/api/automations/missing/test", engine))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn deleted_and_inactive_automations_stop_matching() {
    let (target, paths) = spawn_target().await;
    let engine = spawn_engine().await;
    let client = reqwest::Client::new();

    client
        .put(format!("{}/api/automations/notify", engine))
        .json(&notify_automation(&target))
        .send()
        .await
        .unwrap();

    let mut inactive = notify_automation(&target);
    inactive["status"] = json!("inactive");
    client
        .put(format!("{}/api/automations/paused", engine))
        .json(&inactive)
        .send()
        .await
        .unwrap();

    let deleted = client
        .delete(format!("{}/api/automations/notify", engine))
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status().as_u16(), 200);

    let dispatched: Value = client
        .post(format!("{}/api/events", engine))
        .json(&expired_event())
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(dispatched["matched"], 0);
    assert!(paths.lock().unwrap().is_empty());
}
