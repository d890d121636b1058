use serde_json::json;

use crate::common::{TestApp, jpeg_with_date_taken, routes, sample_jpeg, sha1_hex};

mod upload {
    use super::*;

    #[tokio::test]
    async fn upload_returns_created_row() {
        let app = TestApp::spawn().await;
        let token = app.user_token("alice");

        let bytes = sample_jpeg(64, 48, "upload");
        let checksum = sha1_hex(&bytes);
        let res = app
            .upload_with_token("holiday/beach.jpg", bytes, Some(&checksum), &token)
            .await;

        assert_eq!(res.status, 201, "{}", res.text);
        assert_eq!(res.body["owner_uid"], "alice");
        assert_eq!(res.body["width"], 64);
        assert_eq!(res.body["height"], 48);
        assert_eq!(res.body["checksum"], checksum);
        assert_eq!(res.body["metadata"]["original_file_name"], "beach.jpg");
        assert_eq!(res.body["metadata"]["file_type"], "jpg");

        let uid = res.body["uid"].as_str().unwrap();
        assert!(app.dir.path().join("library").join(uid).is_dir());
    }

    #[tokio::test]
    async fn checksum_mismatch_is_rejected() {
        let app = TestApp::spawn().await;
        let token = app.user_token("alice");

        let res = app
            .upload_with_token(
                "a.jpg",
                sample_jpeg(16, 16, "mismatch"),
                Some("0000000000000000000000000000000000000000"),
                &token,
            )
            .await;

        assert_eq!(res.status, 400);
        assert_eq!(res.body["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn duplicate_upload_conflicts() {
        let app = TestApp::spawn().await;
        let token = app.user_token("alice");
        let bytes = sample_jpeg(16, 16, "dup");

        let first = app
            .upload_with_token("a.jpg", bytes.clone(), None, &token)
            .await;
        assert_eq!(first.status, 201);

        let second = app.upload_with_token("b.jpg", bytes, None, &token).await;
        assert_eq!(second.status, 409);
    }

    #[tokio::test]
    async fn unsupported_extension_is_rejected() {
        let app = TestApp::spawn().await;
        let token = app.user_token("alice");

        let res = app
            .upload_with_token("notes.txt", b"hello".to_vec(), None, &token)
            .await;
        assert_eq!(res.status, 400);
    }

    #[tokio::test]
    async fn listing_requires_auth() {
        let app = TestApp::spawn().await;

        let res = app.get_without_token(routes::IMAGES).await;
        assert_eq!(res.status, 401);
        assert_eq!(res.body["code"], "TOKEN_MISSING");
    }

    #[tokio::test]
    async fn url_upload_is_disabled_by_default() {
        let app = TestApp::spawn().await;
        let token = app.user_token("alice");

        let res = app
            .post_with_token(
                routes::IMAGES_URL,
                &json!({ "url": "http://127.0.0.1:1/photo.jpg" }),
                &token,
            )
            .await;
        assert_eq!(res.status, 403);
        assert_eq!(res.body["code"], "PERMISSION_DENIED");
    }
}

mod processing {
    use super::*;

    #[tokio::test]
    async fn upload_is_processed_and_thumbnail_served() {
        let app = TestApp::spawn().await;
        let token = app.user_token("alice");

        let bytes = jpeg_with_date_taken(1920, 1080, "2020:01:02 03:04:05");
        let res = app
            .upload_with_token("dated.jpg", bytes, None, &token)
            .await;
        assert_eq!(res.status, 201, "{}", res.text);
        let uid = res.body["uid"].as_str().unwrap().to_string();

        let body = app.wait_processed(&uid, &token).await;
        assert_eq!(body["metadata"]["file_created_at"], "2020-01-02T03:04:05Z");
        let thumbhash = body["metadata"]["thumbhash"].as_str().unwrap();
        assert!(!thumbhash.is_empty());

        let thumb = app
            .get_bytes(&routes::image_transform(&uid, "thumbnail"), Some(&token), &[])
            .await;
        assert_eq!(thumb.status, 200);
        assert_eq!(thumb.header("content-type"), Some("image/webp"));

        let decoded = image::load_from_memory(&thumb.bytes).expect("thumbnail decodes");
        assert_eq!(decoded.width(), 400);
        assert_eq!(decoded.height(), 225);
    }

    #[tokio::test]
    async fn exif_endpoint_reports_capture_date() {
        let app = TestApp::spawn().await;
        let token = app.user_token("alice");

        let bytes = jpeg_with_date_taken(32, 32, "2021:06:07 08:09:10");
        let res = app.upload_with_token("exif.jpg", bytes, None, &token).await;
        let uid = res.body["uid"].as_str().unwrap().to_string();

        let res = app.get_with_token(&routes::image_exif(&uid), &token).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body["uid"], uid);
        assert!(res.body["exif"].is_object());
    }

    #[tokio::test]
    async fn unknown_transform_name_is_not_found() {
        let app = TestApp::spawn().await;
        let token = app.user_token("alice");
        let uid = app.upload_image(&token, "t.jpg", 16, 16).await;

        let res = app
            .get_with_token(&routes::image_transform(&uid, "poster"), &token)
            .await;
        assert_eq!(res.status, 404);
    }
}

mod editing {
    use super::*;

    #[tokio::test]
    async fn owner_can_update_metadata() {
        let app = TestApp::spawn().await;
        let token = app.user_token("alice");
        let uid = app.upload_image(&token, "e.jpg", 16, 16).await;

        let res = app
            .patch_with_token(
                &routes::image(&uid),
                &json!({
                    "name": "sunset",
                    "description": "over the bay",
                    "rating": 4,
                    "keywords": ["sea", "sky"]
                }),
                &token,
            )
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["name"], "sunset");
        assert_eq!(res.body["description"], "over the bay");
        assert_eq!(res.body["metadata"]["rating"], 4);
        assert_eq!(res.body["metadata"]["keywords"], json!(["sea", "sky"]));

        let res = app
            .patch_with_token(&routes::image(&uid), &json!({ "description": null }), &token)
            .await;
        assert_eq!(res.status, 200);
        assert!(res.body["description"].is_null());
        assert_eq!(res.body["name"], "sunset");
    }

    #[tokio::test]
    async fn rating_above_five_is_rejected() {
        let app = TestApp::spawn().await;
        let token = app.user_token("alice");
        let uid = app.upload_image(&token, "r.jpg", 16, 16).await;

        let res = app
            .patch_with_token(&routes::image(&uid), &json!({ "rating": 6 }), &token)
            .await;
        assert_eq!(res.status, 400);
    }

    #[tokio::test]
    async fn other_user_cannot_update() {
        let app = TestApp::spawn().await;
        let alice = app.user_token("alice");
        let bob = app.user_token("bob");
        let uid = app.upload_image(&alice, "o.jpg", 16, 16).await;

        let res = app
            .patch_with_token(&routes::image(&uid), &json!({ "name": "mine" }), &bob)
            .await;
        assert_eq!(res.status, 403);
    }

    #[tokio::test]
    async fn private_images_are_hidden_from_others() {
        let app = TestApp::spawn().await;
        let alice = app.user_token("alice");
        let bob = app.user_token("bob");
        let uid = app.upload_image(&alice, "p.jpg", 16, 16).await;

        let res = app
            .patch_with_token(&routes::image(&uid), &json!({ "private": true }), &alice)
            .await;
        assert_eq!(res.status, 200);

        let res = app.get_with_token(&routes::image(&uid), &bob).await;
        assert_eq!(res.status, 404);

        let res = app.get_with_token(routes::IMAGES, &bob).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body["pagination"]["total"], 0);

        let res = app.get_with_token(routes::IMAGES, &app.admin_token()).await;
        assert_eq!(res.body["pagination"]["total"], 1);
    }
}

mod deletion {
    use super::*;

    #[tokio::test]
    async fn soft_delete_moves_to_trash_and_restore_brings_back() {
        let app = TestApp::spawn().await;
        let token = app.user_token("alice");
        let uid = app.upload_image(&token, "x.jpg", 16, 16).await;

        let res = app
            .delete_json_with_token(routes::IMAGES, &json!({ "uids": [uid] }), &token)
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["results"][0]["status"], 200);

        let file = app.get_bytes(&routes::image_file(&uid), Some(&token), &[]).await;
        assert_eq!(file.status, 404);
        assert!(app.dir.path().join("trash").join(&uid).is_dir());
        assert!(!app.dir.path().join("library").join(&uid).exists());

        let res = app
            .post_with_token(&routes::image_restore(&uid), &json!({}), &token)
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert!(res.body["deleted_at"].is_null());

        let file = app.get_bytes(&routes::image_file(&uid), Some(&token), &[]).await;
        assert_eq!(file.status, 200);
    }

    #[tokio::test]
    async fn force_delete_removes_everything() {
        let app = TestApp::spawn().await;
        let token = app.user_token("alice");
        let uid = app.upload_image(&token, "f.jpg", 16, 16).await;

        let res = app
            .delete_json_with_token(
                routes::IMAGES,
                &json!({ "uids": [uid], "force": true }),
                &token,
            )
            .await;
        assert_eq!(res.status, 200);
        assert!(!app.dir.path().join("library").join(&uid).exists());
        assert!(!app.dir.path().join("trash").join(&uid).exists());

        let res = app
            .post_with_token(&routes::image_restore(&uid), &json!({}), &token)
            .await;
        assert_eq!(res.status, 404);
    }

    #[tokio::test]
    async fn partial_failure_reports_multi_status() {
        let app = TestApp::spawn().await;
        let alice = app.user_token("alice");
        let bob = app.user_token("bob");
        let mine = app.upload_image(&alice, "m.jpg", 16, 16).await;
        let theirs = app.upload_image(&bob, "t.jpg", 17, 17).await;

        let res = app
            .delete_json_with_token(routes::IMAGES, &json!({ "uids": [mine, theirs] }), &alice)
            .await;
        assert_eq!(res.status, 207, "{}", res.text);

        let results = res.body["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["uid"], mine);
        assert_eq!(results[0]["status"], 200);
        assert_eq!(results[1]["uid"], theirs);
        assert_eq!(results[1]["status"], 403);
    }

    #[tokio::test]
    async fn empty_uid_list_is_rejected() {
        let app = TestApp::spawn().await;
        let token = app.user_token("alice");

        let res = app
            .delete_json_with_token(routes::IMAGES, &json!({ "uids": [] }), &token)
            .await;
        assert_eq!(res.status, 400);
    }
}
