use axum::{extract::DefaultBodyLimit, extract::State, response::Redirect, routing, Json, Router};
use serde::{Deserialize, Serialize};

use super::{gallery, recognize, AppState};

pub fn app(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", routing::get(index))
        .route("/enroll", routing::post(gallery::enroll))
        .route("/recognize", routing::post(recognize::post))
        .route("/members", routing::get(gallery::list))
        .route("/members/:name", routing::delete(gallery::remove))
        .route("/members/:name/photo", routing::get(gallery::photo))
        .route("/rebuild", routing::post(gallery::rebuild))
        .route("/status", routing::get(status))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

pub async fn index() -> Redirect {
    Redirect::to("/members")
}

#[derive(Serialize, Deserialize, Debug)]
pub struct StatusResponse {
    pub version: String,
    pub generation: u64,
    pub members: usize,
    pub tolerance: f32,
}

pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let (generation, snapshot) = state.gallery.read_versioned();
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_owned(),
        generation,
        members: snapshot.len(),
        tolerance: state.matcher.tolerance(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::{DoorActuator, UnlockFuture};
    use crate::engine::{spawn_gallery_worker, spawn_recognizer};
    use crate::handlers::recognize::RecognizeResponse;
    use crate::handlers::ErrorResponse;
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use doorward_core::testing::{png_with_faces, PixelFaceExtractor};
    use doorward_core::{EnrollmentService, GalleryStore, ImageStore, Matcher, SnapshotCache};
    use http_body_util::BodyExt; // for `collect`
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tower::ServiceExt; // for `oneshot`

    const BOUNDARY: &str = "doorward-test-boundary";
    const RED: [u8; 3] = [220, 20, 20];
    const BLUE: [u8; 3] = [20, 20, 220];

    /// Reports every unlock on a channel.
    struct ChannelActuator(mpsc::UnboundedSender<String>);

    impl DoorActuator for ChannelActuator {
        fn unlock<'a>(&'a self, member: &'a str) -> UnlockFuture<'a> {
            let _ = self.0.send(member.to_owned());
            Box::pin(async { Ok(()) })
        }
    }

    struct Harness {
        app: Router,
        unlocks: mpsc::UnboundedReceiver<String>,
        _dir: tempfile::TempDir,
    }

    async fn harness(max_upload_bytes: usize) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let images = ImageStore::open(dir.path().join("enrolled")).unwrap();
        let cache = SnapshotCache::new(dir.path().join("cache.json"));
        let gallery = Arc::new(GalleryStore::empty());
        let matcher = Arc::new(Matcher::with_default_tolerance(Arc::clone(&gallery)));

        let service = EnrollmentService::new(images.clone(), cache, Arc::clone(&gallery));
        let gallery_worker = spawn_gallery_worker(service, PixelFaceExtractor::new()).unwrap();
        gallery_worker.load_or_rebuild().await.unwrap();
        let recognizer = spawn_recognizer(PixelFaceExtractor::new(), None).unwrap();

        let (tx, unlocks) = mpsc::unbounded_channel();
        let state = AppState {
            recognizer,
            gallery_worker,
            gallery,
            matcher,
            images,
            actuator: Arc::new(ChannelActuator(tx)),
        };

        Harness {
            app: app(state, max_upload_bytes),
            unlocks,
            _dir: dir,
        }
    }

    fn multipart_body(name: Option<&str>, photo: Option<&[u8]>) -> Vec<u8> {
        let mut body = Vec::new();
        if let Some(name) = name {
            body.extend_from_slice(
                format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\n{name}\r\n")
                    .as_bytes(),
            );
        }
        if let Some(photo) = photo {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"upload.png\"\r\n\
                     Content-Type: image/png\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(photo);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    async fn enroll(app: &Router, name: Option<&str>, photo: Option<&[u8]>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/enroll")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(name, photo)))
            .unwrap();
        send(app, request).await
    }

    async fn recognize(app: &Router, image: Vec<u8>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/recognize")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::from(image))
            .unwrap();
        send(app, request).await
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, json)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn index_redirects_to_members() {
        let h = harness(1 << 20).await;
        let response = h.app.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(response.headers()[header::LOCATION], "/members");
    }

    #[tokio::test]
    async fn enroll_then_recognize_unlocks() {
        let mut h = harness(1 << 20).await;

        let (status, body) = enroll(&h.app, Some("alice"), Some(&png_with_faces(&[RED]))).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], "enrolled");
        assert_eq!(body["name"], "alice");
        assert_eq!(body["members"], serde_json::json!(["alice"]));

        let (status, body) = recognize(&h.app, png_with_faces(&[RED])).await;
        assert_eq!(status, StatusCode::OK);
        let parsed: RecognizeResponse = serde_json::from_value(body).unwrap();
        assert_eq!(
            parsed,
            RecognizeResponse::Known {
                name: "alice".to_owned()
            }
        );

        let unlocked = tokio::time::timeout(Duration::from_secs(5), h.unlocks.recv())
            .await
            .unwrap();
        assert_eq!(unlocked.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn recognize_stranger_is_unknown() {
        let mut h = harness(1 << 20).await;
        enroll(&h.app, Some("alice"), Some(&png_with_faces(&[RED]))).await;

        let (status, body) = recognize(&h.app, png_with_faces(&[BLUE])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "result": "unknown" }));
        assert!(h.unlocks.try_recv().is_err());
    }

    #[tokio::test]
    async fn recognize_against_empty_gallery_is_unknown() {
        let h = harness(1 << 20).await;
        let (_, body) = recognize(&h.app, png_with_faces(&[RED])).await;
        assert_eq!(body, serde_json::json!({ "result": "unknown" }));
    }

    #[tokio::test]
    async fn recognize_without_face() {
        let h = harness(1 << 20).await;
        let (status, body) = recognize(&h.app, png_with_faces(&[])).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!({ "result": "no_face" }));
    }

    #[tokio::test]
    async fn recognize_rejects_empty_and_garbage_bodies() {
        let h = harness(1 << 20).await;

        let (status, body) = recognize(&h.app, Vec::new()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let err: ErrorResponse = serde_json::from_value(body).unwrap();
        assert_eq!(err.error, "no image data");

        let (status, body) = recognize(&h.app, b"definitely not a jpeg".to_vec()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad image");
    }

    #[tokio::test]
    async fn recognize_rejects_oversized_body() {
        let h = harness(64).await;
        let (status, _) = recognize(&h.app, vec![0xff; 1024]).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn enroll_without_face_reports_no_face() {
        let h = harness(1 << 20).await;
        let (status, body) = enroll(&h.app, Some("bob"), Some(&png_with_faces(&[]))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "no_face");
        assert_eq!(body["members"], serde_json::json!([]));
        assert_eq!(body["warnings"][0]["kind"], "no_face");
    }

    #[tokio::test]
    async fn enroll_rejects_bad_input() {
        let h = harness(1 << 20).await;

        let (status, body) = enroll(&h.app, Some("alice"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "missing name or photo");

        let (status, _) = enroll(&h.app, None, Some(&png_with_faces(&[RED]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = enroll(&h.app, Some("../etc"), Some(&png_with_faces(&[RED]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = enroll(&h.app, Some("alice"), Some(b"plain text")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = enroll(&h.app, Some("alice"), Some(b"")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, members) = send(&h.app, get("/members")).await;
        assert_eq!(members["members"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn members_list_photo_and_remove() {
        let h = harness(1 << 20).await;
        let photo = png_with_faces(&[RED]);
        enroll(&h.app, Some("alice"), Some(&photo)).await;
        enroll(&h.app, Some("bob"), Some(&png_with_faces(&[]))).await;

        let (status, body) = send(&h.app, get("/members")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body["members"],
            serde_json::json!([
                { "name": "alice", "file": "alice.png", "recognized": true },
                { "name": "bob", "file": "bob.png", "recognized": false },
            ])
        );

        let response = h.app.clone().oneshot(get("/members/alice.png/photo")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], &photo[..]);

        let (status, _) = send(&h.app, get("/members/carol.png/photo")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let delete = |uri: &str| {
            Request::builder()
                .method(Method::DELETE)
                .uri(uri)
                .body(Body::empty())
                .unwrap()
        };
        let (status, body) = send(&h.app, delete("/members/alice")).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["removed_files"], serde_json::json!(["alice.png"]));

        let (status, _) = send(&h.app, delete("/members/alice")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = recognize(&h.app, png_with_faces(&[RED])).await;
        assert_eq!(body["result"], "unknown");
    }

    #[tokio::test]
    async fn rebuild_and_status() {
        let h = harness(1 << 20).await;
        enroll(&h.app, Some("alice"), Some(&png_with_faces(&[RED]))).await;

        let request = Request::builder()
            .method(Method::POST)
            .uri("/rebuild")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&h.app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["members"], serde_json::json!(["alice"]));
        assert_eq!(body["scanned"], 1);

        let (status, body) = send(&h.app, get("/status")).await;
        assert_eq!(status, StatusCode::OK);
        let parsed: StatusResponse = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.members, 1);
        // startup rebuild, enroll, explicit rebuild
        assert_eq!(parsed.generation, 3);
        assert_eq!(parsed.tolerance, doorward_core::DEFAULT_TOLERANCE);
    }
}
