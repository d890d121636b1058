use crate::common::{TestApp, routes};

const WEBP_800: &str = "format=webp&w=800&h=0&quality=80";

fn file_with(uid: &str, query: &str) -> String {
    format!("{}?{query}", routes::image_file(uid))
}

async fn cached_files(app: &TestApp, uid: &str) -> usize {
    let dir = app.services.state.library.transforms_dir(uid).unwrap();
    let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
        return 0;
    };
    let mut count = 0;
    while let Some(entry) = entries.next_entry().await.unwrap() {
        if entry.file_type().await.unwrap().is_file() {
            count += 1;
        }
    }
    count
}

mod originals {
    use super::*;

    #[tokio::test]
    async fn original_is_served_with_checksum_etag() {
        let app = TestApp::spawn_idle().await;
        let token = app.user_token("alice");
        let uid = app.upload_image(&token, "orig.jpg", 40, 30).await;
        let row = app.get_with_token(&routes::image(&uid), &token).await;
        let checksum = row.body["checksum"].as_str().unwrap().to_string();

        let res = app.get_bytes(&routes::image_file(&uid), Some(&token), &[]).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.header("content-type"), Some("image/jpeg"));
        assert_eq!(res.header("etag"), Some(format!("\"{checksum}\"").as_str()));
        assert!(res.header("last-modified").is_some());
        assert!(res.header("content-disposition").unwrap().starts_with("inline"));

        let etag = res.header("etag").unwrap().to_string();
        let res = app
            .get_bytes(
                &routes::image_file(&uid),
                Some(&token),
                &[("If-None-Match", &etag)],
            )
            .await;
        assert_eq!(res.status, 304);
        assert!(res.bytes.is_empty());
    }

    #[tokio::test]
    async fn download_flag_sets_attachment() {
        let app = TestApp::spawn_idle().await;
        let token = app.user_token("alice");
        let uid = app.upload_image(&token, "att.jpg", 20, 20).await;

        let res = app
            .get_bytes(&file_with(&uid, "download=1"), Some(&token), &[])
            .await;
        assert_eq!(res.status, 200);
        assert!(
            res.header("content-disposition")
                .unwrap()
                .starts_with("attachment")
        );
    }

    #[tokio::test]
    async fn anonymous_request_is_rejected() {
        let app = TestApp::spawn_idle().await;
        let token = app.user_token("alice");
        let uid = app.upload_image(&token, "anon.jpg", 20, 20).await;

        let res = app.get_bytes(&routes::image_file(&uid), None, &[]).await;
        assert_eq!(res.status, 401);
    }
}

mod renditions {
    use super::*;

    #[tokio::test]
    async fn webp_rendition_is_cached_and_revalidated() {
        let app = TestApp::spawn_idle().await;
        let token = app.user_token("alice");
        let uid = app.upload_image(&token, "wide.jpg", 1600, 900).await;

        let first = app
            .get_bytes(&file_with(&uid, WEBP_800), Some(&token), &[])
            .await;
        assert_eq!(first.status, 200);
        assert_eq!(first.header("content-type"), Some("image/webp"));
        let decoded = image::load_from_memory(&first.bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (800, 450));
        assert_eq!(cached_files(&app, &uid).await, 1);

        let etag = first.header("etag").unwrap().to_string();
        let second = app
            .get_bytes(
                &file_with(&uid, WEBP_800),
                Some(&token),
                &[("If-None-Match", &etag)],
            )
            .await;
        assert_eq!(second.status, 304);
        assert_eq!(second.header("etag"), Some(etag.as_str()));
    }

    #[tokio::test]
    async fn cached_rendition_survives_missing_original() {
        let app = TestApp::spawn_idle().await;
        let token = app.user_token("alice");
        let uid = app.upload_image(&token, "gone.jpg", 400, 300).await;
        let row = app.get_with_token(&routes::image(&uid), &token).await;
        let file_name = row.body["metadata"]["file_name"].as_str().unwrap().to_string();

        let first = app
            .get_bytes(&file_with(&uid, WEBP_800), Some(&token), &[])
            .await;
        assert_eq!(first.status, 200);
        let etag = first.header("etag").unwrap().to_string();

        let original = app
            .services
            .state
            .library
            .original_path(&uid, &file_name)
            .unwrap();
        tokio::fs::remove_file(original).await.unwrap();

        let cached = app
            .get_bytes(&file_with(&uid, WEBP_800), Some(&token), &[])
            .await;
        assert_eq!(cached.status, 200);
        assert_eq!(cached.bytes, first.bytes);

        let revalidated = app
            .get_bytes(
                &file_with(&uid, WEBP_800),
                Some(&token),
                &[("If-None-Match", &etag)],
            )
            .await;
        assert_eq!(revalidated.status, 304);
    }

    #[tokio::test]
    async fn different_parameters_produce_different_etags() {
        let app = TestApp::spawn_idle().await;
        let token = app.user_token("alice");
        let uid = app.upload_image(&token, "two.jpg", 300, 200).await;

        let a = app
            .get_bytes(&file_with(&uid, "format=png&w=100"), Some(&token), &[])
            .await;
        let b = app
            .get_bytes(&file_with(&uid, "format=png&w=120"), Some(&token), &[])
            .await;
        assert_eq!(a.status, 200);
        assert_eq!(b.status, 200);
        assert_eq!(a.header("content-type"), Some("image/png"));
        assert_ne!(a.header("etag"), b.header("etag"));
        assert_eq!(cached_files(&app, &uid).await, 2);
    }

    #[tokio::test]
    async fn invalid_parameters_are_rejected() {
        let app = TestApp::spawn_idle().await;
        let token = app.user_token("alice");
        let uid = app.upload_image(&token, "bad.jpg", 20, 20).await;

        for query in ["format=gif", "quality=101", "rotate=45", "w=-1"] {
            let res = app
                .get_bytes(&file_with(&uid, query), Some(&token), &[])
                .await;
            assert_eq!(res.status, 400, "query {query}");
        }
    }
}
