use std::io::{Cursor, Read};

use serde_json::json;

use crate::common::{TestApp, routes};

async fn sign(app: &TestApp, token: &str, body: serde_json::Value) -> String {
    let res = app.post_with_token(routes::DOWNLOAD_SIGN, &body, token).await;
    assert_eq!(res.status, 201, "{}", res.text);
    res.body["token"].as_str().unwrap().to_string()
}

fn zip_names(bytes: &[u8]) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).expect("valid zip");
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

mod signing {
    use super::*;

    #[tokio::test]
    async fn sign_returns_token_details() {
        let app = TestApp::spawn_idle().await;
        let user = app.user_token("alice");
        let a = app.upload_image(&user, "a.jpg", 16, 16).await;

        let res = app
            .post_with_token(
                routes::DOWNLOAD_SIGN,
                &json!({ "uids": [a], "expires_in": 60, "password": "p", "description": "share" }),
                &user,
            )
            .await;
        assert_eq!(res.status, 201, "{}", res.text);
        assert_eq!(res.body["uids"], json!([a]));
        assert_eq!(res.body["password_protected"], true);
        assert_eq!(res.body["allow_download"], true);
        assert_eq!(res.body["allow_embed"], false);
        assert!(res.body["expires_at"].is_string());
        assert!(res.text.find("\"p\"").is_none());
    }

    #[tokio::test]
    async fn cannot_sign_unknown_or_foreign_private_images() {
        let app = TestApp::spawn_idle().await;
        let alice = app.user_token("alice");
        let bob = app.user_token("bob");
        let a = app.upload_image(&alice, "a.jpg", 16, 16).await;
        app.patch_with_token(&routes::image(&a), &json!({ "private": true }), &alice)
            .await;

        let res = app
            .post_with_token(routes::DOWNLOAD_SIGN, &json!({ "uids": [a] }), &bob)
            .await;
        assert_eq!(res.status, 404);

        let res = app
            .post_with_token(
                routes::DOWNLOAD_SIGN,
                &json!({ "uids": ["aaaaaaaaaaaaaaaaaaaaaaaa"] }),
                &alice,
            )
            .await;
        assert_eq!(res.status, 404);
    }
}

mod archives {
    use super::*;

    #[tokio::test]
    async fn password_protected_subset_download() {
        let app = TestApp::spawn_idle().await;
        let user = app.user_token("alice");
        let a = app.upload_image(&user, "a.jpg", 16, 16).await;
        let b = app.upload_image(&user, "b.jpg", 17, 17).await;
        let c = app.upload_image(&user, "c.jpg", 18, 18).await;

        let token = sign(
            &app,
            &user,
            json!({ "uids": [a, b], "expires_in": 60, "password": "p", "allow_embed": false }),
        )
        .await;

        let res = app
            .post_bytes(&routes::download(&token), &json!({ "uids": [a] }))
            .await;
        assert_eq!(res.status, 401);

        let path = format!("{}&password=p", routes::download(&token));
        let res = app.post_bytes(&path, &json!({ "uids": [a] })).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.header("content-type"), Some("application/zip"));
        assert!(
            res.header("content-disposition")
                .unwrap()
                .contains(".zip")
        );
        assert_eq!(zip_names(&res.bytes), vec!["a.jpg".to_string()]);

        let res = app.post_bytes(&path, &json!({ "uids": [a, c] })).await;
        assert_eq!(res.status, 401);
    }

    #[tokio::test]
    async fn empty_body_downloads_every_authorized_image() {
        let app = TestApp::spawn_idle().await;
        let user = app.user_token("alice");
        let a = app.upload_image(&user, "one.jpg", 16, 16).await;
        let b = app.upload_image(&user, "two.jpg", 17, 17).await;
        let token = sign(&app, &user, json!({ "uids": [a, b] })).await;

        let res = app
            .client
            .post(app.url(&routes::download(&token)))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        let bytes = res.bytes().await.unwrap();

        let mut names = zip_names(&bytes);
        names.sort();
        assert_eq!(names, vec!["one.jpg".to_string(), "two.jpg".to_string()]);

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        let mut entry = archive.by_name("one.jpg").unwrap();
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        assert!(image::load_from_memory(&content).is_ok());
    }

    #[tokio::test]
    async fn duplicate_names_get_suffixes() {
        let app = TestApp::spawn_idle().await;
        let user = app.user_token("alice");
        let a = app.upload_image(&user, "same.jpg", 16, 16).await;
        let b = app.upload_image(&user, "same.jpg", 17, 17).await;
        let token = sign(&app, &user, json!({ "uids": [a, b] })).await;

        let res = app.post_bytes(&routes::download(&token), &json!({})).await;
        assert_eq!(res.status, 200);
        let names = zip_names(&res.bytes);
        assert_eq!(names.len(), 2);
        assert_ne!(names[0], names[1]);
    }

    #[tokio::test]
    async fn disallowed_download_is_forbidden() {
        let app = TestApp::spawn_idle().await;
        let user = app.user_token("alice");
        let a = app.upload_image(&user, "a.jpg", 16, 16).await;
        let token = sign(&app, &user, json!({ "uids": [a], "allow_download": false })).await;

        let res = app.post_bytes(&routes::download(&token), &json!({})).await;
        assert_eq!(res.status, 403);
    }

    #[tokio::test]
    async fn unknown_token_is_rejected() {
        let app = TestApp::spawn_idle().await;

        let res = app
            .post_bytes(&routes::download("nope"), &json!({}))
            .await;
        assert_eq!(res.status, 401);
    }
}

mod token_access {
    use super::*;

    #[tokio::test]
    async fn token_serves_file_without_bearer() {
        let app = TestApp::spawn_idle().await;
        let user = app.user_token("alice");
        let a = app.upload_image(&user, "a.jpg", 16, 16).await;
        let b = app.upload_image(&user, "b.jpg", 17, 17).await;
        let token = sign(&app, &user, json!({ "uids": [a] })).await;

        let res = app
            .get_bytes(&format!("{}?token={token}", routes::image_file(&a)), None, &[])
            .await;
        assert_eq!(res.status, 200);

        let res = app
            .get_bytes(&format!("{}?token={token}", routes::image_file(&b)), None, &[])
            .await;
        assert_eq!(res.status, 401);
    }

    #[tokio::test]
    async fn foreign_referer_is_blocked_without_embed() {
        let app = TestApp::spawn_idle().await;
        let user = app.user_token("alice");
        let a = app.upload_image(&user, "a.jpg", 16, 16).await;
        let path = format!("{}?token=", routes::image_file(&a));

        let blocked = sign(&app, &user, json!({ "uids": [a] })).await;
        let res = app
            .get_bytes(
                &format!("{path}{blocked}"),
                None,
                &[("Referer", "https://elsewhere.example/page")],
            )
            .await;
        assert_eq!(res.status, 403);

        let own = format!("http://{}/gallery", app.addr);
        let res = app
            .get_bytes(&format!("{path}{blocked}"), None, &[("Referer", &own)])
            .await;
        assert_eq!(res.status, 200);

        let embeddable = sign(&app, &user, json!({ "uids": [a], "allow_embed": true })).await;
        let res = app
            .get_bytes(
                &format!("{path}{embeddable}"),
                None,
                &[("Referer", "https://elsewhere.example/page")],
            )
            .await;
        assert_eq!(res.status, 200);
    }

    #[tokio::test]
    async fn single_download_redirects_with_token() {
        let app = TestApp::spawn_idle().await;
        let user = app.user_token("alice");
        let a = app.upload_image(&user, "a.jpg", 16, 16).await;

        let res = app.get_with_token(&routes::image_download(&a), &user).await;
        assert_eq!(res.status, 302);
        let location = res.header("location").unwrap().to_string();
        assert!(location.starts_with(&routes::image_file(&a)));
        assert!(location.contains("download=1"));

        let file = app.get_bytes(&location, None, &[]).await;
        assert_eq!(file.status, 200);
        assert!(
            file.header("content-disposition")
                .unwrap()
                .starts_with("attachment")
        );
    }
}

mod revocation {
    use sea_orm::EntityTrait;
    use server::entity::download_token;

    use super::*;

    #[tokio::test]
    async fn hard_delete_removes_only_tokens_naming_just_that_image() {
        let app = TestApp::spawn_idle().await;
        let user = app.user_token("alice");
        let a = app.upload_image(&user, "a.jpg", 16, 16).await;
        let b = app.upload_image(&user, "b.jpg", 17, 17).await;

        let sole = sign(&app, &user, json!({ "uids": [a] })).await;
        let mixed = sign(&app, &user, json!({ "uids": [a, b] })).await;
        let other = sign(&app, &user, json!({ "uids": [b] })).await;

        let res = app
            .delete_json_with_token(routes::IMAGES, &json!({ "uids": [a], "force": true }), &user)
            .await;
        assert_eq!(res.status, 200, "{}", res.text);

        let exists = |uid: String| {
            let db = app.db.clone();
            async move {
                download_token::Entity::find_by_id(uid)
                    .one(&db)
                    .await
                    .unwrap()
                    .is_some()
            }
        };
        assert!(!exists(sole).await);
        assert!(exists(mixed).await);
        assert!(exists(other).await);
    }
}
