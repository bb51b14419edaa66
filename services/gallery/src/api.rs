use crate::config::ApiConfig;
use crate::error::GalleryError;
use crate::image_service::{BucketObject, ImageService, ImageUpload};
use crate::metadata_store::{ImageRecord, ImageUpdate};
use crate::object_store::content_type_for_extension;
use anyhow::{Context, Result};
use axum::{
    extract::{
        multipart::{Field, MultipartRejection},
        rejection::JsonRejection,
        DefaultBodyLimit, Multipart, Path, State,
    },
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::future::Future;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: ImageService,
}

/// Image list response
#[derive(Debug, Serialize)]
pub struct ImageListResponse {
    pub images: Vec<ImageRecord>,
}

/// Single image response
#[derive(Debug, Serialize)]
pub struct ImageResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub image: ImageRecord,
}

/// Bucket listing response
#[derive(Debug, Serialize)]
pub struct ObjectListResponse {
    pub objects: Vec<BucketObject>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// API error carrying its HTTP status
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub error: Option<String>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            error: None,
        }
    }

    /// Map a service error; `failure` is the message used for store failures
    fn from_service(failure: &str, err: GalleryError) -> Self {
        match err {
            GalleryError::Validation(message) => Self::bad_request(message),
            GalleryError::NotFound => Self {
                status: StatusCode::NOT_FOUND,
                message: err.to_string(),
                error: None,
            },
            GalleryError::ObjectStore(_) | GalleryError::MetadataStore(_) => {
                error!(error = %err, "{}", failure);
                let unavailable = match err {
                    GalleryError::ObjectStore(_) => "Object store unavailable",
                    _ => "Metadata store unavailable",
                };
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: failure.to_string(),
                    error: Some(unavailable.to_string()),
                }
            }
        }
    }

    /// Rejected request body; oversized bodies keep their 413
    fn rejected_body(status: StatusCode, message: &str, detail: String) -> Self {
        let status = if status == StatusCode::PAYLOAD_TOO_LARGE {
            status
        } else {
            StatusCode::BAD_REQUEST
        };

        Self {
            status,
            message: message.to_string(),
            error: Some(detail),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::rejected_body(rejection.status(), "Invalid JSON body", rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::rejected_body(
            rejection.status(),
            "Invalid multipart body",
            rejection.body_text(),
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            message: self.message,
            error: self.error,
        };

        (self.status, Json(body)).into_response()
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let cors = if config.cors_origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins)
    };

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/images", get(list_images).post(create_image))
        .route(
            "/images/:id",
            get(get_image).put(update_image).delete(delete_image),
        )
        .route("/objects", get(list_objects))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Service banner
async fn root() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Image Gallery API Server",
        "endpoints": {
            "images": "/images",
            "objects": "/objects",
            "health": "/health"
        }
    }))
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "gallery-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => {
            error!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "status": "not_ready",
                    "database": "disconnected"
                })),
            )
        }
    }
}

/// List all images, most recent first
#[instrument(skip(state))]
async fn list_images(State(state): State<AppState>) -> Result<Json<ImageListResponse>, ApiError> {
    let images = state
        .service
        .list()
        .await
        .map_err(|e| ApiError::from_service("Failed to fetch images", e))?;

    Ok(Json(ImageListResponse { images }))
}

/// Get single image metadata
#[instrument(skip(state))]
async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ImageResponse>, ApiError> {
    let id = parse_id(&id)?;

    let image = state
        .service
        .get(id)
        .await
        .map_err(|e| ApiError::from_service("Failed to fetch image", e))?;

    Ok(Json(ImageResponse {
        message: None,
        image,
    }))
}

/// Upload an image with its metadata
#[instrument(skip(state, multipart))]
async fn create_image(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<ImageResponse>), ApiError> {
    let upload = read_upload(multipart?).await?;

    let image = state
        .service
        .create(upload)
        .await
        .map_err(|e| ApiError::from_service("Failed to create image", e))?;

    Ok((
        StatusCode::CREATED,
        Json(ImageResponse {
            message: Some("Image created successfully".to_string()),
            image,
        }),
    ))
}

/// Update image metadata
#[instrument(skip(state, update))]
async fn update_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
    update: Result<Json<ImageUpdate>, JsonRejection>,
) -> Result<Json<ImageResponse>, ApiError> {
    let id = parse_id(&id)?;
    let Json(update) = update?;

    let image = state
        .service
        .update(id, update)
        .await
        .map_err(|e| ApiError::from_service("Failed to update image", e))?;

    Ok(Json(ImageResponse {
        message: Some("Image updated successfully".to_string()),
        image,
    }))
}

/// Delete an image and its object
#[instrument(skip(state))]
async fn delete_image(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let id = parse_id(&id)?;

    state
        .service
        .delete(id)
        .await
        .map_err(|e| ApiError::from_service("Failed to delete image", e))?;

    Ok(Json(MessageResponse {
        message: "Image deleted successfully".to_string(),
    }))
}

/// List bucket objects described by their keys
#[instrument(skip(state))]
async fn list_objects(State(state): State<AppState>) -> Result<Json<ObjectListResponse>, ApiError> {
    let objects = state
        .service
        .browse()
        .await
        .map_err(|e| ApiError::from_service("Failed to list objects", e))?;

    Ok(Json(ObjectListResponse { objects }))
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .map_err(|_| ApiError::bad_request("Invalid image ID"))
}

/// Collect the file part (`image` or `file`) and metadata fields
async fn read_upload(mut multipart: Multipart) -> Result<ImageUpload, ApiError> {
    let mut upload = ImageUpload::default();
    let mut has_file = false;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(field_name) = field.name().map(str::to_string) else {
            continue;
        };

        match field_name.as_str() {
            "image" | "file" => {
                upload.filename = field.file_name().unwrap_or_default().to_string();
                upload.content_type = match field.content_type() {
                    Some(content_type) => content_type.to_string(),
                    None => {
                        let extension = upload.filename.rsplit_once('.').map(|(_, e)| e);
                        content_type_for_extension(extension.unwrap_or_default()).to_string()
                    }
                };
                upload.data = field.bytes().await.map_err(multipart_error)?.to_vec();
                has_file = true;
            }
            "name" => upload.name = read_text(field).await?,
            "type" => upload.kind = Some(read_text(field).await?),
            "model" => upload.model = Some(read_text(field).await?),
            "color" => upload.color = Some(read_text(field).await?),
            _ => {}
        }
    }

    if !has_file {
        return Err(ApiError::bad_request("No file uploaded"));
    }

    Ok(upload)
}

async fn read_text(field: Field<'_>) -> Result<String, ApiError> {
    field.text().await.map_err(multipart_error)
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::rejected_body(err.status(), "Invalid multipart body", err.body_text())
}

/// Start the gallery API server; returns once `shutdown` resolves
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting gallery API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .context("API server error")?;

    Ok(())
}
