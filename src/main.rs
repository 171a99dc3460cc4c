use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use axum::{Router, extract::DefaultBodyLimit, response::IntoResponse, routing::get};
use dotenv::dotenv;
use std::env;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

mod email_client;
mod reset_store;
mod routes;

use email_client::{EmailClientConfig, MailDispatcher, SmtpMailer};
use reset_store::{MemoryResetStore, RedisResetStore, ResetCodeStore};

#[cfg(all(target_env = "musl", not(target_os = "macos")))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

// axum caps request bodies at 2 MB by default, below the upload field limit.
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

async fn root() -> impl IntoResponse {
    "Backend is working!"
}

#[derive(Clone)]
struct AppState {
    store: Arc<dyn ResetCodeStore>,
    mailer: Arc<dyn MailDispatcher>,
    base_url: String,
    uploads_dir: PathBuf,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        routes::password::forgot_password,
        routes::password::verify_reset_code,
        routes::upload::upload_profile_picture,
    ),
    components(schemas(
        routes::MessageResponse,
        routes::ErrorResponse,
        routes::password::ForgotPasswordBody,
        routes::password::VerifyCodeBody,
        routes::password::SubmittedCode,
        routes::upload::UploadResponse,
    )),
    tags(
        (name = "Password", description = "Password reset code flow"),
        (name = "Upload", description = "Profile picture uploads"),
    )
)]
struct ApiDoc;

fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .merge(routes::password::password_router())
        .merge(routes::upload::upload_router())
        .nest_service("/uploads", ServeDir::new(&state.uploads_dir))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=debug", env!("CARGO_CRATE_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5000);

    let email_config = EmailClientConfig {
        smtp_server: env::var("SMTP_SERVER").unwrap_or_else(|_| "smtp.gmail.com".to_owned()),
        smtp_port: env::var("SMTP_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(587),
        username: env::var("EMAIL_USER").unwrap(),
        password: env::var("EMAIL_PASS").unwrap(),
    };

    let store: Arc<dyn ResetCodeStore> = match env::var("REDIS_URL") {
        Ok(url) => {
            let store = RedisResetStore::connect(&url).await.unwrap();
            tracing::info!("using the redis reset code store");
            Arc::new(store)
        }
        Err(_) => Arc::new(MemoryResetStore::new()),
    };

    let uploads_dir =
        PathBuf::from(env::var("UPLOADS_DIR").unwrap_or_else(|_| "uploads".to_owned()));
    if let Err(e) = tokio::fs::create_dir_all(&uploads_dir).await {
        tracing::warn!("Failed to create uploads directory: {}", e);
    }

    let state = AppState {
        store,
        mailer: Arc::new(SmtpMailer::new(email_config)),
        base_url: format!("http://localhost:{port}"),
        uploads_dir,
    };

    let app = app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::debug!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
