use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::access::GenerationRejection;
use crate::llm::headshot::HeadshotGenerationError;
use crate::llm::media::ImageInputError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Missing caller identity: send an x-user-id or x-guest-id header")]
    MissingIdentity,

    #[error("Too many requests. Wait {0} seconds between generations.")]
    RateLimited(u64),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    InvalidImage(#[from] ImageInputError),

    #[error(transparent)]
    Rejected(#[from] GenerationRejection),

    #[error(transparent)]
    Generation(#[from] HeadshotGenerationError),

    #[error("Internal error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingIdentity => StatusCode::UNAUTHORIZED,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::BadRequest(_) | Self::InvalidImage(_) => StatusCode::BAD_REQUEST,
            Self::Rejected(GenerationRejection::GenerationLimitReached { .. }) => {
                StatusCode::PAYMENT_REQUIRED
            }
            Self::Rejected(GenerationRejection::InvalidQuantity)
            | Self::Rejected(GenerationRejection::InvalidSetting { .. }) => {
                StatusCode::BAD_REQUEST
            }
            Self::Rejected(_) => StatusCode::FORBIDDEN,
            Self::Generation(HeadshotGenerationError::ModelUnavailable { .. }) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Generation(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingIdentity => "UNAUTHENTICATED",
            Self::RateLimited(_) => "RATE_LIMITED",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::InvalidImage(_) => "INVALID_IMAGE",
            Self::Rejected(GenerationRejection::GenerationLimitReached { .. }) => {
                "GENERATION_LIMIT_REACHED"
            }
            Self::Rejected(GenerationRejection::InvalidQuantity)
            | Self::Rejected(GenerationRejection::InvalidSetting { .. }) => "INVALID_SETTINGS",
            Self::Rejected(_) => "FEATURE_NOT_AVAILABLE",
            Self::Generation(HeadshotGenerationError::PermissionDenied { .. }) => {
                "MODEL_PERMISSION_DENIED"
            }
            Self::Generation(HeadshotGenerationError::ModelUnavailable { .. }) => {
                "MODEL_UNAVAILABLE"
            }
            Self::Generation(_) => "GENERATION_FAILED",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Generation(HeadshotGenerationError::Upstream(reason)) => {
                format!("Headshot generation failed: {reason}")
            }
            other => other.to_string(),
        }
    }

    fn field(&self) -> Option<String> {
        match self {
            Self::Rejected(rejection) => Some(rejection.field().to_string()),
            Self::InvalidImage(_) => Some("image".to_string()),
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if let Self::Internal(err) = &self {
            tracing::error!(error = ?err, "Internal API error");
        }

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message: self.message(),
                field: self.field(),
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::SubscriptionTier;

    #[test]
    fn quota_rejections_are_payment_required() {
        let err = ApiError::from(GenerationRejection::GenerationLimitReached {
            used: 3,
            limit: 3,
            tier: SubscriptionTier::Guest,
        });
        assert_eq!(err.status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(err.field().as_deref(), Some("generationLimit"));
    }

    #[test]
    fn feature_rejections_are_forbidden() {
        let err = ApiError::from(GenerationRejection::CustomStyleNotAllowed {
            tier: SubscriptionTier::Free,
        });
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.error_code(), "FEATURE_NOT_AVAILABLE");
    }

    #[test]
    fn upstream_failures_are_prefixed() {
        let err = ApiError::from(HeadshotGenerationError::Upstream("quota exceeded".to_string()));
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.message(), "Headshot generation failed: quota exceeded");
    }

    #[test]
    fn model_errors_keep_their_explanations() {
        let denied = ApiError::from(HeadshotGenerationError::PermissionDenied {
            model: "m".to_string(),
            detail: "nope".to_string(),
        });
        assert_eq!(denied.status_code(), StatusCode::BAD_GATEWAY);
        assert!(denied.message().contains("API key"));

        let unavailable = ApiError::from(HeadshotGenerationError::ModelUnavailable {
            model: "m".to_string(),
            detail: "gone".to_string(),
        });
        assert_eq!(unavailable.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = ApiError::from(anyhow::anyhow!("database is locked"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message(), "Internal error");
    }
}
