use serde_json::json;

use crate::common::{TestApp, routes};

fn event_names(events: &serde_json::Value) -> Vec<String> {
    events
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn image_lifecycle_is_recorded() {
    let app = TestApp::spawn_idle().await;
    let token = app.user_token("alice");
    let uid = app.upload_image(&token, "a.jpg", 16, 16).await;
    app.patch_with_token(&routes::image(&uid), &json!({ "name": "renamed" }), &token)
        .await;
    app.delete_json_with_token(routes::IMAGES, &json!({ "uids": [uid] }), &token)
        .await;

    let res = app.get_with_token(routes::EVENTS_RECENT, &token).await;
    assert_eq!(res.status, 200);
    let names = event_names(&res.body);
    let position = |name: &str| names.iter().position(|n| n == name).unwrap();
    assert!(position("image-created") < position("image-updated"));
    assert!(position("image-updated") < position("image-deleted"));

    let deleted = res
        .body
        .as_array()
        .unwrap()
        .iter()
        .find(|e| e["event"] == "image-deleted")
        .unwrap();
    assert_eq!(deleted["data"]["image_uid"], uid);
}

#[tokio::test]
async fn since_pages_forward_from_cursor() {
    let app = TestApp::spawn_idle().await;
    let token = app.user_token("alice");
    for i in 0..3 {
        app.upload_image(&token, &format!("{i}.jpg"), 16 + i, 16).await;
    }

    let res = app
        .get_with_token(&format!("{}&limit=2", routes::events_since(0)), &token)
        .await;
    assert_eq!(res.status, 200);
    let first = res.body["events"].as_array().unwrap().clone();
    assert_eq!(first.len(), 2);
    let ids: Vec<u64> = first.iter().map(|e| e["id"].as_u64().unwrap()).collect();
    assert!(ids[0] < ids[1]);

    let cursor = res.body["next_cursor"].as_u64().unwrap();
    assert_eq!(cursor, ids[1]);
    let last_id = res.body["last_id"].as_u64().unwrap();

    let res = app.get_with_token(&routes::events_since(cursor), &token).await;
    let rest = res.body["events"].as_array().unwrap();
    assert!(!rest.is_empty());
    assert!(rest.iter().all(|e| e["id"].as_u64().unwrap() > cursor));
    assert_eq!(rest.last().unwrap()["id"].as_u64().unwrap(), last_id);

    let res = app.get_with_token(&routes::events_since(last_id), &token).await;
    assert!(res.body["events"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn events_require_auth() {
    let app = TestApp::spawn_idle().await;
    let res = app.get_without_token(routes::EVENTS_RECENT).await;
    assert_eq!(res.status, 401);
}

#[tokio::test]
async fn client_list_is_admin_only() {
    let app = TestApp::spawn_idle().await;

    let res = app
        .get_with_token(routes::EVENT_CLIENTS, &app.user_token("alice"))
        .await;
    assert_eq!(res.status, 403);

    let res = app
        .get_with_token(routes::EVENT_CLIENTS, &app.admin_token())
        .await;
    assert_eq!(res.status, 200);
    assert_eq!(res.body["count"], 0);
}
