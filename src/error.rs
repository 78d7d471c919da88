use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Market data unavailable: {0}")] DataUnavailable(String),

    #[error("Invalid rule configuration: {0}")] InvalidRuleConfiguration(String),

    #[error("Channel delivery failed: {0}")] ChannelDelivery(String),

    #[error("Invalid input: {0}")] InvalidInput(String),

    #[error("Rule not found")]
    RuleNotFound,

    #[error("Notification not found")]
    NotificationNotFound,

    #[error("An evaluation cycle is already in progress")]
    CycleInProgress,

    #[error("External API error: {0}")] External(String),

    #[error("IO error: {0}")] Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")] Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")] Config(String),

    #[error("Internal error: {0}")] Internal(String),
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            AppError::DataUnavailable(err.to_string())
        } else {
            AppError::External(err.to_string())
        }
    }
}

#[derive(serde::Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(serde::Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::DataUnavailable(_) => "DATA_UNAVAILABLE",
            AppError::InvalidRuleConfiguration(_) => "INVALID_RULE_CONFIGURATION",
            AppError::ChannelDelivery(_) => "CHANNEL_DELIVERY_FAILURE",
            AppError::InvalidInput(_) => "INVALID_INPUT",
            AppError::RuleNotFound => "RULE_NOT_FOUND",
            AppError::NotificationNotFound => "NOTIFICATION_NOT_FOUND",
            AppError::CycleInProgress => "CYCLE_IN_PROGRESS",
            AppError::External(_) => "EXTERNAL_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn to_error_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::RuleNotFound | AppError::NotificationNotFound => {
                axum::http::StatusCode::NOT_FOUND
            }
            AppError::InvalidInput(_) | AppError::InvalidRuleConfiguration(_) => {
                axum::http::StatusCode::BAD_REQUEST
            }
            AppError::CycleInProgress => axum::http::StatusCode::CONFLICT,
            AppError::DataUnavailable(_) | AppError::External(_) => {
                axum::http::StatusCode::BAD_GATEWAY
            }
            _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        };

        let response = self.to_error_response();
        (status, axum::Json(response)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
