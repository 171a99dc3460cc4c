#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::{AppState, app, email_client::MockMailer, reset_store::MemoryResetStore};

    const BOUNDARY: &str = "test-boundary";

    fn multipart_request(field_name: &str, file_name: &str, contents: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{field_name}\"; filename=\"{file_name}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
        body.extend_from_slice(contents);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn test_state(uploads_dir: &std::path::Path) -> AppState {
        AppState {
            store: Arc::new(MemoryResetStore::new()),
            mailer: Arc::new(MockMailer::new()),
            base_url: "http://localhost:5000".to_owned(),
            uploads_dir: uploads_dir.to_path_buf(),
        }
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_upload_stores_file_and_returns_url() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let response = app(state)
            .oneshot(multipart_request("profilePic", "avatar.png", b"fake png bytes"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;

        let url = body["imageUrl"].as_str().unwrap();
        assert!(url.starts_with("http://localhost:5000/uploads/"), "{url}");
        assert!(url.ends_with(".png"), "{url}");

        let file_name = url.rsplit('/').next().unwrap();
        let saved = std::fs::read(dir.path().join(file_name)).unwrap();
        assert_eq!(saved, b"fake png bytes");
    }

    #[tokio::test]
    async fn test_upload_without_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let response = app(state)
            .oneshot(multipart_request("somethingElse", "avatar.png", b"bytes"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "No file uploaded");

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_upload_without_extension_stores_bare_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let response = app(state)
            .oneshot(multipart_request("profilePic", "avatar", b"bytes"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;

        let url = body["imageUrl"].as_str().unwrap();
        let file_name = url.rsplit('/').next().unwrap();
        assert!(
            file_name.chars().all(|c| c.is_ascii_digit()),
            "{file_name}"
        );
    }

    #[tokio::test]
    async fn test_uploaded_file_is_served_back() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());

        let response = app(state.clone())
            .oneshot(multipart_request("profilePic", "avatar.png", b"served bytes"))
            .await
            .unwrap();
        let body = json_body(response).await;
        let file_name = body["imageUrl"]
            .as_str()
            .unwrap()
            .rsplit('/')
            .next()
            .unwrap()
            .to_owned();

        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri(format!("/uploads/{file_name}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let served = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&served[..], b"served bytes");
    }
}
