//! HTTP API tests driving the router directly with `oneshot`.

use std::fs::{self, File};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;
use zip::write::SimpleFileOptions;

use labelizer::config::Config;
use labelizer::server::{router, AppState};
use labelizer_core::models::{Collection, Encoders, Item, NewTriplet};
use labelizer_core::store::memory::InMemoryStore;
use labelizer_core::store::Store;

const API: &str = "/api/labelizer/v1";

async fn seeded_state(tmp: &TempDir) -> AppState {
    let store = InMemoryStore::new();
    let items: Vec<Item> = [("a", [1.0f32, 0.0]), ("b", [0.8, 0.2]), ("c", [0.0, 1.0])]
        .iter()
        .map(|(id, v)| Item {
            id: id.to_string(),
            length: 4.0,
            dataset: "set1".into(),
            vector: Some(v.to_vec()),
        })
        .collect();
    store.insert_items(&items).await.unwrap();

    let triplet = NewTriplet {
        reference_id: "a".into(),
        left_id: "b".into(),
        right_id: "c".into(),
        encoders: Encoders::Single {
            encoder_id: "enc".into(),
        },
        label: None,
        user_id: None,
    };
    store
        .insert_triplets(Collection::Primary, &[triplet.clone(), triplet], None)
        .await
        .unwrap();

    AppState::new(Config::minimal(tmp.path()), Arc::new(store))
}

fn app(state: &AppState) -> Router {
    router(state.clone())
}

async fn send(state: &AppState, req: Request<Body>) -> (StatusCode, Vec<u8>, axum::http::HeaderMap) {
    let resp = app(state).oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
    (status, body, headers)
}

async fn get_json(state: &AppState, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body, _) = send(state, req).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_json(state: &AppState, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let (status, body, _) = send(state, req).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn health_and_config() {
    let tmp = TempDir::new().unwrap();
    let state = seeded_state(&tmp).await;

    let (status, body) = get_json(&state, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = get_json(&state, &format!("{API}/config")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["lock_timeout_in_seconds"], 30);
}

#[tokio::test]
async fn triplets_are_leased_then_exhausted() {
    let tmp = TempDir::new().unwrap();
    let state = seeded_state(&tmp).await;

    let (status, first) = get_json(&state, &format!("{API}/triplet")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["id"], 1);
    assert_eq!(first["reference_dataset"], "set1");
    assert_eq!(first["left_length"], 4.0);
    assert_eq!(first["encoder_id"], "enc");

    let (_, second) = get_json(&state, &format!("{API}/triplet")).await;
    assert_eq!(second["id"], 2);

    let (status, body) = get_json(&state, &format!("{API}/triplet")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, _) = get_json(&state, &format!("{API}/triplet?validation=true")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn labeling_updates_stats() {
    let tmp = TempDir::new().unwrap();
    let state = seeded_state(&tmp).await;

    let (status, _) = post_json(&state, &format!("{API}/triplet?triplet_id=1&label=left")).await;
    assert_eq!(status, StatusCode::OK);

    let labeled = state
        .store
        .get_triplet(Collection::Primary, 1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(labeled.user_id.as_deref(), Some("default-user"));

    let (_, stats) = get_json(&state, &format!("{API}/triplet/stats")).await;
    assert_eq!(stats["labeled"], 1);
    assert_eq!(stats["unlabeled"], 1);
    assert_eq!(stats["validation_labeled"], 0);

    let (status, body) =
        post_json(&state, &format!("{API}/triplet?triplet_id=1&label=maybe")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = post_json(&state, &format!("{API}/triplet?triplet_id=77&label=right")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_routes_require_admin_group() {
    let tmp = TempDir::new().unwrap();
    let state = seeded_state(&tmp).await;

    let req = Request::builder()
        .uri(format!("{API}/download"))
        .header("x-forwarded-user", "bob")
        .header("x-forwarded-groups", "standard")
        .body(Body::empty())
        .unwrap();
    let (status, body, _) = send(&state, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"]["code"], "forbidden");

    let req = Request::builder()
        .method("DELETE")
        .uri(format!("{API}/delete"))
        .header("x-forwarded-groups", "standard")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&state, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(state.store.count_triplets(Collection::Primary, false).await.unwrap(), 2);
}

#[tokio::test]
async fn download_is_named_csv_attachment() {
    let tmp = TempDir::new().unwrap();
    let state = seeded_state(&tmp).await;
    post_json(&state, &format!("{API}/triplet?triplet_id=2&label=dont_know")).await;

    let req = Request::builder()
        .uri(format!("{API}/download"))
        .body(Body::empty())
        .unwrap();
    let (status, body, headers) = send(&state, req).await;
    assert_eq!(status, StatusCode::OK);
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
    assert!(disposition.starts_with("attachment; filename="));
    assert!(disposition.ends_with("_labelizer_triplets.csv"));

    let text = String::from_utf8(body).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].starts_with("2,a,b,c,enc,dont_know,default-user,"));

    let req = Request::builder()
        .method("DELETE")
        .uri(format!("{API}/delete"))
        .body(Body::empty())
        .unwrap();
    let (status, body, _) = send(&state, req).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["deleted"], 2);
}

#[tokio::test]
async fn similarity_and_neighbors() {
    let tmp = TempDir::new().unwrap();
    let state = seeded_state(&tmp).await;

    let (status, body) = get_json(&state, &format!("{API}/similarity/a/a")).await;
    assert_eq!(status, StatusCode::OK);
    let score = body["similarity_score"].as_f64().unwrap();
    assert!((score - 1.0).abs() < 1e-5);

    let (status, _) = get_json(&state, &format!("{API}/similarity/a/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) =
        get_json(&state, &format!("{API}/neighbors/a?nearest_neighbors_count=2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["neighbors"], serde_json::json!(["a", "b"]));

    let (status, _) =
        get_json(&state, &format!("{API}/neighbors/a?nearest_neighbors_count=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn images_are_served_by_variant() {
    let tmp = TempDir::new().unwrap();
    let state = seeded_state(&tmp).await;
    let dir = &state.config.storage.images_dir;
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join("a.stp.png"), b"plain").unwrap();
    fs::write(dir.join("a_canonical.stp.png"), b"canon").unwrap();

    let req = Request::builder()
        .uri(format!("{API}/images/a?canonical=true"))
        .body(Body::empty())
        .unwrap();
    let (status, body, headers) = send(&state, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"canon");
    assert_eq!(headers[header::CONTENT_TYPE], "image/png");

    let req = Request::builder()
        .uri(format!("{API}/images/zz"))
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(&state, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

fn archive_bytes(dir: &TempDir) -> Vec<u8> {
    let path = dir.path().join("upload.zip");
    let file = File::create(&path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();
    zip.add_directory("data/images/", options).unwrap();
    for name in ["a", "a_canonical", "b", "b_canonical", "c", "c_canonical"] {
        zip.start_file(format!("data/images/{name}.stp.png"), options)
            .unwrap();
        zip.write_all(b"png").unwrap();
    }
    zip.start_file("data/triplets.csv", options).unwrap();
    zip.write_all(b"reference_id,left_id,right_id,encoder_id\nc,a,b,enc2\n")
        .unwrap();
    zip.start_file("data/validation_triplets.csv", options).unwrap();
    zip.write_all(
        b"reference_id,left_id,right_id,left_encoder_id,right_encoder_id\na,b,c,e1,e2\n",
    )
    .unwrap();
    zip.finish().unwrap();
    fs::read(&path).unwrap()
}

#[tokio::test]
async fn upload_runs_in_background_and_is_pollable() {
    let tmp = TempDir::new().unwrap();
    let state = seeded_state(&tmp).await;

    let (_, latest) = get_json(&state, &format!("{API}/upload")).await;
    assert_eq!(latest["id"], 0);
    assert_eq!(latest["uploaded_count"], 0);

    let boundary = "labelizer-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"data.zip\"\r\nContent-Type: application/zip\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(&archive_bytes(&tmp));
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let req = Request::builder()
        .method("POST")
        .uri(format!("{API}/upload"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();
    let (status, body, _) = send(&state, req).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let accepted: Value = serde_json::from_slice(&body).unwrap();
    let id = accepted["id"].as_i64().unwrap();
    assert!(id > 0);

    let mut status_body = Value::Null;
    for _ in 0..100 {
        let (_, body) = get_json(&state, &format!("{API}/upload/{id}")).await;
        if body["stage"] == "done" || body["stage"] == "failed" {
            status_body = body;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(status_body["stage"], "done", "{status_body}");
    assert_eq!(status_body["to_upload_count"], 2);
    assert_eq!(status_body["uploaded_count"], 2);

    assert_eq!(
        state.store.count_triplets(Collection::Validation, false).await.unwrap(),
        1
    );
    assert!(state.config.storage.images_dir.join("b_canonical.stp.png").is_file());
}

#[tokio::test]
async fn upload_without_file_field_is_bad_request() {
    let tmp = TempDir::new().unwrap();
    let state = seeded_state(&tmp).await;

    let boundary = "b";
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nx\r\n--{boundary}--\r\n"
    );
    let req = Request::builder()
        .method("POST")
        .uri(format!("{API}/upload"))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap();
    let (status, _, _) = send(&state, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
