use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::classifier::{ImageClassifier, Prediction};
use crate::error::ClassifierError;
use crate::preprocess::decode_image;

/// Maximum `top_k` accepted at the HTTP boundary. The core additionally
/// bounds it by the label-set size.
pub const MAX_TOP_K: usize = 10;

const DEFAULT_TOP_K: usize = 5;

/// Shared state behind the router.
pub struct AppState {
    pub classifier: ImageClassifier,
}

#[derive(Debug, Serialize)]
pub struct PredictionResult {
    pub class_name: String,
    pub confidence: f32,
}

impl From<Prediction> for PredictionResult {
    fn from(p: Prediction) -> Self {
        Self {
            class_name: p.label,
            confidence: p.confidence,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub success: bool,
    pub predictions: Vec<PredictionResult>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model_loaded: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct PredictParams {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

/// Transport-level error: a status code plus the serialized error schema.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<ClassifierError> for ApiError {
    fn from(err: ClassifierError) -> Self {
        let status = match err {
            ClassifierError::InvalidImage(_) | ClassifierError::InvalidArgument(_) => {
                StatusCode::BAD_REQUEST
            }
            ClassifierError::Initialization(_) | ClassifierError::Prediction(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            success: false,
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

/// Builds the application router.
pub fn router(state: Arc<AppState>, body_limit: usize) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/predict", post(predict))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "classifier-rs",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Image classification API over pretrained ONNX models",
        "health": "/health",
    }))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model_loaded: state.classifier.is_ready(),
    })
}

async fn predict(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PredictParams>,
    multipart: Multipart,
) -> Result<Json<PredictionResponse>, ApiError> {
    if params.top_k < 1 || params.top_k > MAX_TOP_K {
        return Err(ApiError::bad_request(format!(
            "top_k must be between 1 and {MAX_TOP_K}"
        )));
    }

    let upload = read_upload(multipart).await?;
    let image = decode_image(&upload.bytes)?;

    tracing::info!(
        file = %upload.filename,
        width = image.width(),
        height = image.height(),
        "processing uploaded image"
    );

    let predictions = state.classifier.predict(&image, params.top_k).await?;

    if let Some(top) = predictions.first() {
        tracing::info!(
            file = %upload.filename,
            label = %top.label,
            confidence = top.confidence,
            "prediction completed"
        );
    }

    Ok(Json(PredictionResponse {
        success: true,
        predictions: predictions.into_iter().map(PredictionResult::from).collect(),
        message: format!("Successfully classified {}", upload.filename),
    }))
}

struct Upload {
    filename: String,
    bytes: Vec<u8>,
}

/// Pulls the `file` field out of the multipart body, rejecting non-image
/// content types up front.
async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }

        if let Some(content_type) = field.content_type() {
            if !content_type.starts_with("image/") {
                return Err(ApiError::bad_request(format!(
                    "invalid file type: {content_type}, please upload an image"
                )));
            }
        }

        let filename = field.file_name().unwrap_or("upload").to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("failed to read upload: {e}")))?
            .to_vec();

        return Ok(Upload { filename, bytes });
    }

    Err(ApiError::bad_request("missing 'file' field in multipart body"))
}
