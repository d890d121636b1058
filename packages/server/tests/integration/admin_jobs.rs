use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::json;

use server::entity::dead_letter_job;

use crate::common::{TestApp, routes};

async fn create_dead_letter(app: &TestApp, image_uid: &str, resolved: bool) -> i32 {
    let now = Utc::now();
    let job_uid = ::common::uid::generate();
    let model = dead_letter_job::ActiveModel {
        job_uid: Set(job_uid.clone()),
        topic: Set("image_process".to_string()),
        image_uid: Set(Some(image_uid.to_string())),
        payload: Set(json!({
            "image_uid": image_uid,
            "requested_by": "admin",
            "source": "admin",
        })
        .to_string()),
        error_message: Set("decode failed".to_string()),
        error_code: Set("max_retries_exceeded".to_string()),
        retry_count: Set(3),
        retry_history: Set(json!([
            {"attempt": 1, "error": "decode failed", "timestamp": now.to_rfc3339()},
            {"attempt": 2, "error": "decode failed", "timestamp": now.to_rfc3339()},
            {"attempt": 3, "error": "decode failed", "timestamp": now.to_rfc3339()},
        ])),
        first_failed_at: Set(now),
        created_at: Set(now),
        resolved: Set(resolved),
        resolved_at: Set(resolved.then_some(now)),
        resolved_by: Set(None),
        ..Default::default()
    };

    model
        .insert(&app.db)
        .await
        .expect("Failed to create dead-letter entry")
        .id
}

mod enqueue {
    use super::*;

    #[tokio::test]
    async fn missing_command_targets_only_unprocessed_images() {
        let app = TestApp::spawn_idle().await;
        let admin = app.admin_token();

        for i in 0..100 {
            app.insert_image_row("alice", i >= 3).await;
        }

        let res = app
            .post_with_token(
                routes::ADMIN_JOBS,
                &json!({ "type": "thumbnailGeneration", "command": "missing" }),
                &admin,
            )
            .await;
        assert_eq!(res.status, 202, "{}", res.text);
        assert_eq!(res.body["count"], 3);
        assert_eq!(res.body["job_uids"].as_array().unwrap().len(), 3);

        let stats = app.get_with_token(routes::ADMIN_JOB_STATS, &admin).await;
        assert_eq!(stats.status, 200);
        assert_eq!(stats.body["queued_by_topic"]["image_process"], 3);
    }

    #[tokio::test]
    async fn all_command_targets_every_live_image() {
        let app = TestApp::spawn_idle().await;
        let admin = app.admin_token();
        for _ in 0..4 {
            app.insert_image_row("alice", true).await;
        }

        let res = app
            .post_with_token(
                routes::ADMIN_JOBS,
                &json!({ "type": "exifProcessing", "command": "all" }),
                &admin,
            )
            .await;
        assert_eq!(res.status, 202);
        assert_eq!(res.body["count"], 4);
    }

    #[tokio::test]
    async fn single_command_requires_existing_image() {
        let app = TestApp::spawn_idle().await;
        let admin = app.admin_token();

        let res = app
            .post_with_token(
                routes::ADMIN_JOBS,
                &json!({
                    "type": "xmpGeneration",
                    "command": "single",
                    "image_uid": "aaaaaaaaaaaaaaaaaaaaaaaa"
                }),
                &admin,
            )
            .await;
        assert_eq!(res.status, 404);

        let res = app
            .post_with_token(
                routes::ADMIN_JOBS,
                &json!({ "type": "xmpGeneration", "command": "single" }),
                &admin,
            )
            .await;
        assert_eq!(res.status, 400);
    }

    #[tokio::test]
    async fn non_admin_cannot_enqueue() {
        let app = TestApp::spawn_idle().await;
        let user = app.user_token("alice");

        let res = app
            .post_with_token(
                routes::ADMIN_JOBS,
                &json!({ "type": "thumbnailGeneration", "command": "all" }),
                &user,
            )
            .await;
        assert_eq!(res.status, 403);
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn queued_job_can_be_inspected_and_cancelled() {
        let app = TestApp::spawn_idle().await;
        let admin = app.admin_token();
        let uid = app.insert_image_row("alice", false).await;

        let res = app
            .post_with_token(
                routes::ADMIN_JOBS,
                &json!({ "type": "thumbnailGeneration", "command": "single", "image_uid": uid }),
                &admin,
            )
            .await;
        assert_eq!(res.status, 202);
        let job_uid = res.body["job_uids"][0].as_str().unwrap().to_string();

        let res = app.get_with_token(&routes::job(&job_uid), &admin).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body["status"], "queued");
        assert_eq!(res.body["topic"], "image_process");
        assert_eq!(res.body["image_uid"], uid);

        let res = app.delete_with_token(&routes::job(&job_uid), &admin).await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["previous_status"], "queued");

        let res = app.get_with_token(&routes::job(&job_uid), &admin).await;
        assert_eq!(res.body["status"], "cancelled");

        let res = app.delete_with_token(&routes::job(&job_uid), &admin).await;
        assert_eq!(res.status, 409);

        let stats = app.get_with_token(routes::ADMIN_JOB_STATS, &admin).await;
        assert_eq!(stats.body["queued_by_topic"]["image_process"], 0);
    }

    #[tokio::test]
    async fn list_filters_by_topic_and_status() {
        let app = TestApp::spawn_idle().await;
        let admin = app.admin_token();
        app.insert_image_row("alice", false).await;
        app.insert_image_row("alice", false).await;

        for kind in ["thumbnailGeneration", "xmpGeneration"] {
            let res = app
                .post_with_token(
                    routes::ADMIN_JOBS,
                    &json!({ "type": kind, "command": "all" }),
                    &admin,
                )
                .await;
            assert_eq!(res.status, 202);
        }

        let res = app
            .get_with_token(
                &format!("{}?topic=image_process&status=queued", routes::ADMIN_JOBS),
                &admin,
            )
            .await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body["pagination"]["total"], 2);
        for job in res.body["data"].as_array().unwrap() {
            assert_eq!(job["topic"], "image_process");
        }

        let res = app
            .get_with_token(&format!("{}?status=bogus", routes::ADMIN_JOBS), &admin)
            .await;
        assert_eq!(res.status, 400);
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let app = TestApp::spawn_idle().await;
        let res = app
            .get_with_token(&routes::job("aaaaaaaaaaaaaaaaaaaaaaaa"), &app.admin_token())
            .await;
        assert_eq!(res.status, 404);
    }
}

mod counters {
    use super::*;

    #[tokio::test]
    async fn queued_counts_settle_after_immediate_dispatch() {
        let app = TestApp::spawn().await;
        let admin = app.admin_token();
        let token = app.user_token("alice");
        let uids = [
            app.upload_image(&token, "a.jpg", 32, 24).await,
            app.upload_image(&token, "b.jpg", 24, 32).await,
        ];
        for uid in &uids {
            app.wait_processed(uid, &token).await;
        }

        let mut settled = false;
        for _ in 0..100 {
            let stats = app.get_with_token(routes::ADMIN_JOB_STATS, &admin).await;
            let all_zero = |key: &str| {
                stats.body[key]
                    .as_object()
                    .unwrap()
                    .values()
                    .all(|n| n.as_u64() == Some(0))
            };
            if all_zero("queued_by_topic") && all_zero("running_by_topic") {
                settled = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        assert!(settled, "job counters never returned to zero");
    }
}

mod concurrency {
    use super::*;

    #[tokio::test]
    async fn concurrency_can_be_changed_within_bounds() {
        let app = TestApp::spawn_idle().await;
        let admin = app.admin_token();

        let res = app
            .put_with_token(
                &routes::job_concurrency("thumbnailGeneration"),
                &json!({ "concurrency": 2 }),
                &admin,
            )
            .await;
        assert_eq!(res.status, 200, "{}", res.text);
        assert_eq!(res.body["topic"], "image_process");
        assert_eq!(res.body["concurrency"], 2);

        let stats = app.get_with_token(routes::ADMIN_JOB_STATS, &admin).await;
        assert_eq!(stats.body["concurrency"]["image_process"], 2);

        let res = app
            .put_with_token(
                &routes::job_concurrency("thumbnailGeneration"),
                &json!({ "concurrency": 0 }),
                &admin,
            )
            .await;
        assert_eq!(res.status, 400);

        let res = app
            .put_with_token(
                &routes::job_concurrency("resize"),
                &json!({ "concurrency": 2 }),
                &admin,
            )
            .await;
        assert_eq!(res.status, 404);
    }
}

mod dead_letters {
    use super::*;

    #[tokio::test]
    async fn list_and_filter_by_resolution() {
        let app = TestApp::spawn_idle().await;
        let admin = app.admin_token();
        let uid = app.insert_image_row("alice", false).await;

        create_dead_letter(&app, &uid, false).await;
        create_dead_letter(&app, &uid, false).await;
        create_dead_letter(&app, &uid, true).await;

        let res = app.get_with_token(routes::DEAD_LETTERS, &admin).await;
        assert_eq!(res.status, 200);
        assert_eq!(res.body["pagination"]["total"], 3);

        let res = app
            .get_with_token(&format!("{}?resolved=false", routes::DEAD_LETTERS), &admin)
            .await;
        assert_eq!(res.body["pagination"]["total"], 2);
        let first = &res.body["data"][0];
        assert_eq!(first["error_code"], "max_retries_exceeded");
        assert_eq!(first["retry_history"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn retry_enqueues_new_job_and_resolves_entry() {
        let app = TestApp::spawn_idle().await;
        let admin = app.admin_token();
        let uid = app.insert_image_row("alice", false).await;
        let id = create_dead_letter(&app, &uid, false).await;

        let res = app
            .post_with_token(&routes::dead_letter_retry(id), &json!({}), &admin)
            .await;
        assert_eq!(res.status, 202, "{}", res.text);
        let job_uid = res.body["job_uid"].as_str().unwrap().to_string();

        let res = app.get_with_token(&routes::job(&job_uid), &admin).await;
        assert_eq!(res.body["status"], "queued");

        let res = app
            .get_with_token(&format!("{}?resolved=true", routes::DEAD_LETTERS), &admin)
            .await;
        assert_eq!(res.body["pagination"]["total"], 1);
        assert_eq!(res.body["data"][0]["resolved_by"], "admin");

        let res = app
            .post_with_token(&routes::dead_letter_retry(id), &json!({}), &admin)
            .await;
        assert_eq!(res.status, 409);
    }

    #[tokio::test]
    async fn non_admin_cannot_list() {
        let app = TestApp::spawn_idle().await;
        let res = app
            .get_with_token(routes::DEAD_LETTERS, &app.user_token("alice"))
            .await;
        assert_eq!(res.status, 403);
    }
}
