use serde::Serialize;
use utoipa::ToSchema;

pub mod password;
pub mod upload;

mod upload_test;

#[derive(Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}
