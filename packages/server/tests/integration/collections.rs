use serde_json::json;

use crate::common::{TestApp, routes};

async fn create_collection(app: &TestApp, token: &str, name: &str, private: bool) -> String {
    let res = app
        .post_with_token(
            routes::COLLECTIONS,
            &json!({ "name": name, "private": private }),
            token,
        )
        .await;
    assert_eq!(res.status, 201, "{}", res.text);
    res.body["uid"].as_str().unwrap().to_string()
}

fn image_uids(body: &serde_json::Value) -> Vec<String> {
    body["images"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["image_uid"].as_str().unwrap().to_string())
        .collect()
}

mod crud {
    use super::*;

    #[tokio::test]
    async fn create_get_update_delete() {
        let app = TestApp::spawn_idle().await;
        let token = app.user_token("alice");
        let uid = create_collection(&app, &token, "Summer", false).await;

        let res = app.get_with_token(&routes::collection(&uid), &token).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body["name"], "Summer");
        assert_eq!(res.body["owner_uid"], "alice");
        assert_eq!(res.body["image_count"], 0);

        let res = app
            .patch_with_token(
                &routes::collection(&uid),
                &json!({ "name": "Summer 2024", "description": "trip" }),
                &token,
            )
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["name"], "Summer 2024");
        assert_eq!(res.body["description"], "trip");

        let res = app.delete_with_token(&routes::collection(&uid), &token).await;
        assert_eq!(res.status, 204);

        let res = app.get_with_token(&routes::collection(&uid), &token).await;
        assert_eq!(res.status, 404);
    }

    #[tokio::test]
    async fn blank_name_is_rejected() {
        let app = TestApp::spawn_idle().await;
        let token = app.user_token("alice");

        let res = app
            .post_with_token(routes::COLLECTIONS, &json!({ "name": "" }), &token)
            .await;
        assert_eq!(res.status, 400);
    }

    #[tokio::test]
    async fn private_collections_are_hidden_from_others() {
        let app = TestApp::spawn_idle().await;
        let alice = app.user_token("alice");
        let bob = app.user_token("bob");
        create_collection(&app, &alice, "Public", false).await;
        let private = create_collection(&app, &alice, "Secret", true).await;

        let res = app.get_with_token(routes::COLLECTIONS, &bob).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body["pagination"]["total"], 1);
        assert_eq!(res.body["data"][0]["name"], "Public");

        let res = app.get_with_token(&routes::collection(&private), &bob).await;
        assert_eq!(res.status, 404);

        let res = app.get_with_token(routes::COLLECTIONS, &alice).await;
        assert_eq!(res.body["pagination"]["total"], 2);
    }

    #[tokio::test]
    async fn only_owner_can_edit() {
        let app = TestApp::spawn_idle().await;
        let alice = app.user_token("alice");
        let bob = app.user_token("bob");
        let uid = create_collection(&app, &alice, "Mine", false).await;

        let res = app
            .patch_with_token(&routes::collection(&uid), &json!({ "name": "Ours" }), &bob)
            .await;
        assert_eq!(res.status, 403);

        let res = app.delete_with_token(&routes::collection(&uid), &bob).await;
        assert_eq!(res.status, 403);
    }
}

mod membership {
    use super::*;

    #[tokio::test]
    async fn images_keep_insertion_order_and_skip_duplicates() {
        let app = TestApp::spawn_idle().await;
        let token = app.user_token("alice");
        let a = app.upload_image(&token, "a.jpg", 16, 16).await;
        let b = app.upload_image(&token, "b.jpg", 17, 17).await;
        let uid = create_collection(&app, &token, "Set", false).await;

        let res = app
            .post_with_token(
                &routes::collection_images(&uid),
                &json!({ "uids": [b, a] }),
                &token,
            )
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(image_uids(&res.body), vec![b.clone(), a.clone()]);
        assert_eq!(res.body["image_count"], 2);
        assert_eq!(res.body["thumbnail_uid"], b);

        let res = app
            .post_with_token(&routes::collection_images(&uid), &json!({ "uids": [a] }), &token)
            .await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body["image_count"], 2);

        let res = app
            .delete_json_with_token(
                &routes::collection_images(&uid),
                &json!({ "uids": [b] }),
                &token,
            )
            .await;
        assert_eq!(res.status, 200);
        assert_eq!(image_uids(&res.body), vec![a.clone()]);
        assert_eq!(res.body["thumbnail_uid"], a);
    }

    #[tokio::test]
    async fn unknown_image_is_rejected() {
        let app = TestApp::spawn_idle().await;
        let token = app.user_token("alice");
        let uid = create_collection(&app, &token, "Set", false).await;

        let res = app
            .post_with_token(
                &routes::collection_images(&uid),
                &json!({ "uids": ["aaaaaaaaaaaaaaaaaaaaaaaa"] }),
                &token,
            )
            .await;
        assert_eq!(res.status, 404);
    }

    #[tokio::test]
    async fn thumbnail_must_be_a_member() {
        let app = TestApp::spawn_idle().await;
        let token = app.user_token("alice");
        let a = app.upload_image(&token, "a.jpg", 16, 16).await;
        let outsider = app.upload_image(&token, "o.jpg", 17, 17).await;
        let uid = create_collection(&app, &token, "Set", false).await;
        app.post_with_token(&routes::collection_images(&uid), &json!({ "uids": [a] }), &token)
            .await;

        let res = app
            .patch_with_token(
                &routes::collection(&uid),
                &json!({ "thumbnail_uid": outsider }),
                &token,
            )
            .await;
        assert_eq!(res.status, 400);
    }

    #[tokio::test]
    async fn hard_deleted_image_leaves_collections() {
        let app = TestApp::spawn_idle().await;
        let token = app.user_token("alice");
        let a = app.upload_image(&token, "a.jpg", 16, 16).await;
        let b = app.upload_image(&token, "b.jpg", 17, 17).await;
        let uid = create_collection(&app, &token, "Set", false).await;
        app.post_with_token(
            &routes::collection_images(&uid),
            &json!({ "uids": [a, b] }),
            &token,
        )
        .await;

        let res = app
            .delete_json_with_token(
                routes::IMAGES,
                &json!({ "uids": [a], "force": true }),
                &token,
            )
            .await;
        assert_eq!(res.status, 200);

        let res = app.get_with_token(&routes::collection(&uid), &token).await;
        assert_eq!(image_uids(&res.body), vec![b.clone()]);
        assert_eq!(res.body["image_count"], 1);
        assert_eq!(res.body["thumbnail_uid"], b);
    }
}
