use tokio::task::JoinError;
use elasticsearch::Error as ElasticsearchError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;
use tantivy::TantivyError;
use actix_web::{HttpResponse, ResponseError, http::StatusCode};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Elasticsearch error: {0}")]
    Elasticsearch(#[from] ElasticsearchError),

    #[error("Tantivy error: {0}")]
    Tantivy(#[from] TantivyError),

    #[error("JSON error: {0}")]
    Json(#[from] SerdeJsonError),

    #[error("Multipart error: {0}")]
    Multipart(String),

    #[error("Tokio join error: {0}")]
    Join(#[from] JoinError),

    #[error("No file provided")]
    NoFile,

    #[error("Invalid file type. Only images allowed.")]
    InvalidFileType,

    #[error("Form part '{0}' exceeds the {1} byte limit")]
    PartTooLarge(String, usize),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("{0}")]
    Storage(String),

    #[error("Generic error: {0}")]
    Generic(String),

    #[error("{0}")]
    NotFound(String),
}

impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .json(serde_json::json!({
                "error": self.to_string(),
            }))
    }

    fn status_code(&self) -> StatusCode {
        match *self {
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Elasticsearch(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Tantivy(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Json(_) => StatusCode::BAD_REQUEST,
            AppError::Multipart(_) => StatusCode::BAD_REQUEST,
            AppError::Join(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NoFile => StatusCode::BAD_REQUEST,
            AppError::InvalidFileType => StatusCode::BAD_REQUEST,
            AppError::PartTooLarge(..) => StatusCode::BAD_REQUEST,
            AppError::MissingParameter(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            AppError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Generic(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}
