use std::path::Path;

use axum::{
    Json, Router, body::Bytes, extract::State, http::StatusCode, response::IntoResponse,
    routing::post,
};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use chrono::Utc;
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::{AppState, routes::ErrorResponse};

#[derive(TryFromMultipart)]
pub struct UploadBody {
    #[form_data(field_name = "profilePic", limit = "10MiB")]
    pub profile_pic: Option<FieldData<Bytes>>,
}

#[derive(Serialize, ToSchema)]
pub struct UploadResponse {
    #[serde(rename = "imageUrl")]
    pub image_url: String,
}

// Stored names are the upload instant in milliseconds plus the original
// extension, so successive uploads never collide.
fn stored_file_name(original_name: Option<&str>) -> String {
    let extension = original_name
        .and_then(|name| Path::new(name).extension())
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    format!("{}{}", Utc::now().timestamp_millis(), extension)
}

#[utoipa::path(
    post,
    tags = ["Upload"],
    description = "Upload a profile picture as multipart form data (field name profilePic); responds with its public URL.",
    path = "/upload",
    responses(
        (status = 200, description = "File stored", body = UploadResponse),
        (status = 400, description = "No file in the request", body = ErrorResponse),
        (status = 500, description = "Failed to persist the file", body = ErrorResponse),
    )
)]
pub async fn upload_profile_picture(
    State(state): State<AppState>,
    TypedMultipart(body): TypedMultipart<UploadBody>,
) -> impl IntoResponse {
    let file = match body.profile_pic {
        Some(file) => file,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "No file uploaded".to_owned(),
                }),
            )
                .into_response();
        }
    };

    let file_name = stored_file_name(file.metadata.file_name.as_deref());
    let destination = state.uploads_dir.join(&file_name);

    if let Err(e) = tokio::fs::write(&destination, &file.contents).await {
        warn!("Failed to write upload {}: {}", destination.display(), e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Failed to save file".to_owned(),
            }),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        Json(UploadResponse {
            image_url: format!("{}/uploads/{}", state.base_url, file_name),
        }),
    )
        .into_response()
}

pub fn upload_router() -> Router<AppState> {
    Router::new().route("/upload", post(upload_profile_picture))
}
