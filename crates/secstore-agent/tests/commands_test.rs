//! Command endpoint integration tests.
//!
//! Run with: `cargo test -p secstore-agent --test commands_test`

mod helpers;

use helpers::uploads::{qcow2_image, template_params, UploadRequest};
use helpers::{setup_test_app, setup_test_app_with};
use secstore_core::models::{Answer, AnswerPayload};
use serde_json::json;

async fn run(app: &helpers::TestApp, command: serde_json::Value) -> Answer {
    let response = app.client().post("/commands").json(&command).await;
    assert_eq!(response.status_code(), 200, "{}", response.text());
    response.json::<Answer>()
}

#[tokio::test]
async fn test_health() {
    let app = setup_test_app().await;

    let response = app.client().get("/health").await;

    assert_eq!(response.status_code(), 200);
    assert_eq!(response.text(), "ok");
}

#[tokio::test]
async fn test_create_upload_entity_returns_upload_url() {
    let app = setup_test_app().await;

    let answer = run(&app, json!({"command": "create_upload_entity", "upload_id": "tmpl-42"})).await;

    assert!(answer.success, "{}", answer.details);
    match answer.result {
        Some(AnswerPayload::UploadEntity { upload_id, url }) => {
            assert_eq!(upload_id, "tmpl-42");
            assert_eq!(url, "https://ssvm.example.test/upload?uuid=tmpl-42");
        }
        other => panic!("unexpected result {:?}", other),
    }

    let status = run(&app, json!({"command": "upload_status", "upload_id": "tmpl-42"})).await;
    match status.result {
        Some(AnswerPayload::Upload { status }) => assert_eq!(status.status, "created"),
        other => panic!("unexpected result {:?}", other),
    }

    // Same id twice is refused.
    let again = run(&app, json!({"command": "create_upload_entity", "upload_id": "tmpl-42"})).await;
    assert!(!again.success);
}

#[tokio::test]
async fn test_unknown_upload_status() {
    let app = setup_test_app().await;

    let answer = run(&app, json!({"command": "upload_status", "upload_id": "never-seen"})).await;

    assert!(answer.success);
    match answer.result {
        Some(AnswerPayload::Upload { status }) => {
            assert_eq!(status.status, "unknown");
            assert_eq!(status.percent, 0);
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn test_delete_missing_object_succeeds() {
    let app = setup_test_app().await;
    let command = json!({
        "command": "delete",
        "store": app.store(),
        "object": {"type": "template", "id": 9, "name": "gone", "format": "qcow2", "account_id": 2},
    });

    let answer = run(&app, command).await;

    assert!(answer.success, "{}", answer.details);
    assert_eq!(answer.details, "already deleted");
}

#[tokio::test]
async fn test_list_templates_after_upload() {
    let app = setup_test_app().await;
    let response = UploadRequest::new(
        "list-1",
        template_params(app.store()),
        &qcow2_image(1 << 30, 4096),
    )
    .send(app.client())
    .await;
    assert_eq!(response.status_code(), 200, "{}", response.text());

    let answer = run(&app, json!({"command": "list_templates", "store": app.store()})).await;
    assert!(answer.success, "{}", answer.details);
    match answer.result {
        Some(AnswerPayload::Listing { entries }) => {
            assert_eq!(entries.len(), 1);
            let entry = entries.values().next().unwrap();
            assert_eq!(entry.id, Some(201));
            assert_eq!(entry.virtual_size, 1 << 30);
        }
        other => panic!("unexpected result {:?}", other),
    }

    let volumes = run(&app, json!({"command": "list_volumes", "store": app.store()})).await;
    match volumes.result {
        Some(AnswerPayload::Listing { entries }) => assert!(entries.is_empty()),
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn test_compute_checksum() {
    let app = setup_test_app().await;
    let dir = app.store_root().join("template/tmpl/2/9");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("a.raw"), b"hello").unwrap();

    let answer = run(
        &app,
        json!({"command": "compute_checksum", "store": app.store(), "path": "template/tmpl/2/9/a.raw"}),
    )
    .await;

    assert!(answer.success, "{}", answer.details);
    assert_eq!(
        answer.result,
        Some(AnswerPayload::Checksum {
            algorithm: "sha256".to_string(),
            digest: "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824".to_string(),
        })
    );

    let unsupported = run(
        &app,
        json!({
            "command": "compute_checksum",
            "store": app.store(),
            "path": "template/tmpl/2/9/a.raw",
            "algorithm": "md4",
        }),
    )
    .await;
    assert!(!unsupported.success);

    let escape = run(
        &app,
        json!({"command": "compute_checksum", "store": app.store(), "path": "../../etc/passwd"}),
    )
    .await;
    assert!(!escape.success);
}

#[tokio::test]
async fn test_download_url_is_served_and_removed() {
    let app = setup_test_app().await;
    let dir = app.store_root().join("volumes/2/7");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("disk.raw"), b"volume bytes").unwrap();

    let answer = run(
        &app,
        json!({
            "command": "create_entity_download_url",
            "store": app.store(),
            "path": "volumes/2/7/disk.raw",
            "link_name": "vol7.raw",
        }),
    )
    .await;
    assert!(answer.success, "{}", answer.details);
    assert_eq!(
        answer.result,
        Some(AnswerPayload::DownloadUrl {
            url: "http://localhost:8210/userdata/vol7.raw".to_string()
        })
    );
    assert!(app.userdata_dir().join("vol7.raw").exists());

    let served = app.client().get("/userdata/vol7.raw").await;
    assert_eq!(served.status_code(), 200);
    assert_eq!(served.text(), "volume bytes");

    let removed = run(
        &app,
        json!({"command": "delete_entity_download_url", "link_name": "vol7.raw"}),
    )
    .await;
    assert!(removed.success);
    assert!(!app.userdata_dir().join("vol7.raw").exists());

    let again = run(
        &app,
        json!({"command": "delete_entity_download_url", "link_name": "vol7.raw"}),
    )
    .await;
    assert!(again.success);
}

#[tokio::test]
async fn test_copy_between_local_stores_runs_on_worker_pool() {
    let app = setup_test_app().await;
    let src_dir = app.store_root().join("template/tmpl/2/5");
    std::fs::create_dir_all(&src_dir).unwrap();
    std::fs::write(src_dir.join("base.qcow2"), qcow2_image(2 << 30, 2048)).unwrap();

    let dest_root = app.store_root().with_file_name("secondary");
    let command = json!({
        "command": "copy",
        "src_store": app.store(),
        "dest_store": {"kind": "local", "path": dest_root},
        "src_object": {
            "type": "template", "id": 5, "name": "base", "format": "qcow2",
            "account_id": 2, "path": "template/tmpl/2/5/base.qcow2",
        },
        "dest_object": {"type": "template", "id": 5, "name": "base", "format": "qcow2", "account_id": 2},
    });

    let answer = run(&app, command).await;

    assert!(answer.success, "{}", answer.details);
    match answer.result {
        Some(AnswerPayload::Object { object }) => {
            assert!(object.path.starts_with("template/tmpl/2/5/"), "{}", object.path);
            assert_eq!(object.virtual_size, 2 << 30);
            assert!(dest_root.join(&object.path).is_file());
        }
        other => panic!("unexpected result {:?}", other),
    }
}

#[tokio::test]
async fn test_unsupported_store_is_a_failed_answer() {
    let app = setup_test_app().await;
    let command = json!({
        "command": "get_storage_stats",
        "store": {"kind": "swift", "url": "https://swift.example/v1", "account": "a", "user": "u", "key": "k", "container": "c"},
    });

    let answer = run(&app, command).await;

    assert!(!answer.success);
    assert!(answer.details.contains("not supported"), "{}", answer.details);
}

#[tokio::test]
async fn test_malformed_command_is_bad_request() {
    let app = setup_test_app().await;

    let response = app
        .client()
        .post("/commands")
        .json(&json!({"command": "launch_rockets"}))
        .await;

    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn test_service_api_key_required_when_configured() {
    let app = setup_test_app_with(|config| {
        config.service_api_key = Some("command-key".to_string());
    })
    .await;
    let body = json!({"command": "upload_status", "upload_id": "x"});

    let anonymous = app.client().post("/commands").json(&body).await;
    assert_eq!(anonymous.status_code(), 401);

    let wrong = app
        .client()
        .post("/commands")
        .add_header("Authorization", "Bearer other-key")
        .json(&body)
        .await;
    assert_eq!(wrong.status_code(), 401);

    let authorized = app
        .client()
        .post("/commands")
        .add_header("Authorization", "Bearer command-key")
        .json(&body)
        .await;
    assert_eq!(authorized.status_code(), 200);
    assert!(authorized.json::<Answer>().success);
}
