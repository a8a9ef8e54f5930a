//! # Error Handling
//!
//! Two error families live here:
//!
//! - [`ApiError`] is produced while a request runs through a pipeline. It maps to an
//!   HTTP status code and a sanitized JSON body. Internal details are logged with
//!   `tracing` and never sent to the client.
//! - [`ConfigError`] is produced while the API is being assembled (registering routes,
//!   configuring authentication, loading configuration). These are fatal: applications
//!   are expected to propagate them out of `main` so that startup aborts.
//!
//! ```rust,ignore
//! use crudchain::ApiError;
//!
//! fn only_owner(ctx: &mut RequestContext<Widget>) -> Result<(), ApiError> {
//!     match ctx.principal::<User>() {
//!         Some(user) if user.is_admin => Ok(()),
//!         _ => Err(ApiError::forbidden("Admins only")),
//!     }
//! }
//! ```

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use sea_orm::{DbErr, SqlErr};
use serde::Serialize;
use std::fmt;

use crate::validation::ValidationErrors;

/// Per-request error with automatic logging and a sanitized response body
#[derive(Debug)]
pub enum ApiError {
    /// 404 Not Found
    NotFound {
        /// Resource type (e.g. "widgets")
        resource: String,
        /// Identifier that was looked up, if any
        id: Option<String>,
    },

    /// 401 Unauthorized - missing, invalid or expired credentials
    Unauthorized { message: String },

    /// 403 Forbidden - failed login, or an authorize stage rejected the caller
    Forbidden { message: String },

    /// 422 Unprocessable Entity - malformed or oversized payload, id change, constraint violation
    Unprocessable { message: String },

    /// 422 Unprocessable Entity - field level validation errors, sent verbatim
    ValidationFailed { errors: ValidationErrors },

    /// 500 Internal Server Error - database error (details logged, not exposed)
    Database {
        message: String,
        internal: DbErr,
    },

    /// 500 Internal Server Error - anything else
    Internal {
        message: String,
        internal: Option<String>,
    },
}

impl ApiError {
    /// Create a 404 Not Found error
    pub fn not_found(resource: impl Into<String>, id: Option<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id,
        }
    }

    /// Create a 401 Unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Create a 403 Forbidden error
    ///
    /// ```rust,ignore
    /// return Err(ApiError::forbidden("Insufficient permissions"));
    /// ```
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Create a 422 error with a single message
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::Unprocessable {
            message: message.into(),
        }
    }

    /// Create a 422 error carrying per-field validation messages
    #[must_use]
    pub fn validation_failed(errors: ValidationErrors) -> Self {
        Self::ValidationFailed { errors }
    }

    /// Create a 500 error from a database error. The error itself is only logged.
    #[must_use]
    pub fn database(err: DbErr) -> Self {
        Self::Database {
            message: "A database error occurred".to_string(),
            internal: err,
        }
    }

    pub fn internal(message: impl Into<String>, internal: Option<String>) -> Self {
        Self::Internal {
            message: message.into(),
            internal,
        }
    }

    /// Classify a failed insert. Constraint violations are the client's fault.
    #[must_use]
    pub fn from_insert(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => {
                tracing::warn!(error = ?err, "Insert rejected by unique constraint");
                Self::unprocessable("Duplicate entry")
            }
            Some(SqlErr::ForeignKeyConstraintViolation(_)) => {
                tracing::warn!(error = ?err, "Insert rejected by foreign key constraint");
                Self::unprocessable("Invalid reference")
            }
            _ => Self::from(err),
        }
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::Unprocessable { .. } | Self::ValidationFailed { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Database { .. } | Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The user-facing message (sanitized)
    fn user_message(&self) -> String {
        match self {
            Self::NotFound { resource, id } => match id {
                Some(id) => format!("{resource} with ID '{id}' not found"),
                None => format!("{resource} not found"),
            },
            Self::Unauthorized { message }
            | Self::Forbidden { message }
            | Self::Unprocessable { message }
            | Self::Database { message, .. }
            | Self::Internal { message, .. } => message.clone(),
            Self::ValidationFailed { .. } => "Validation failed".to_string(),
        }
    }

    fn log_internal(&self) {
        match self {
            Self::Database { internal, .. } => {
                tracing::error!(error = ?internal, "Database error occurred");
            }
            Self::Internal {
                internal: Some(details),
                ..
            } => {
                tracing::error!(details = %details, "Internal error occurred");
            }
            _ => {
                tracing::debug!(
                    error = %self.user_message(),
                    status = %self.status_code(),
                    "API error"
                );
            }
        }
    }
}

#[derive(Serialize)]
#[serde(untagged)]
enum ErrorResponse<'a> {
    Message { error: String },
    Fields { errors: &'a ValidationErrors },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log_internal();

        let status = self.status_code();
        let body = match &self {
            Self::ValidationFailed { errors } => ErrorResponse::Fields { errors },
            _ => ErrorResponse::Message {
                error: self.user_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for ApiError {}

/// - `DbErr::RecordNotFound` → 404
/// - everything else → 500, logged and sanitized
impl From<DbErr> for ApiError {
    fn from(err: DbErr) -> Self {
        match err {
            DbErr::RecordNotFound(msg) => Self::NotFound {
                resource: msg,
                id: None,
            },
            _ => Self::database(err),
        }
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        Self::validation_failed(errors)
    }
}

/// Setup-time errors. None of these can happen while serving requests.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at most 3 option sets (read, write, delete) may be given, got {0}")]
    TooManyOptionSets(usize),

    #[error("a JWT signing key is required to enable authentication")]
    MissingJwtKey,

    #[error("the API needs a connected database handle")]
    NoDatabase,

    #[error("route {method} {path} requires authentication but set_auth has not been called")]
    AuthNotConfigured { method: String, path: String },

    #[error("route {method} {path} is already registered")]
    DuplicateRoute { method: String, path: String },

    #[error("route prefix {0:?} must start with '/'")]
    InvalidPrefix(String),

    #[error("invalid configuration: {0}")]
    Figment(#[from] Box<figment::Error>),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}
