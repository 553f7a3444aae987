use rocket::http::{ContentType, Status};
use rocket::response::Responder;
use rocket::{Request, Response};
use rocket_okapi::OpenApiError;
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::Responses;
use rocket_okapi::response::OpenApiResponderInner;
use serde_json::json;
use std::io::Cursor;
use thiserror::Error;
use tracing::{error, warn};
use validator::{ValidationErrors, ValidationErrorsKind};

pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred while processing your request";

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal server error")]
    Store {
        message: String,
        #[source]
        source: redis::RedisError,
    },
    #[error("Internal server error")]
    Serialization {
        message: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("User not found")]
    UserNotFound,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Invalid email or password")]
    InvalidCredentials,
    #[error("Please verify your email before logging in")]
    EmailNotVerified,
    #[error("Invalid verification code")]
    InvalidTwoFactorCode,
    #[error("Too many failed verification attempts. Please try again later.")]
    TwoFactorLocked,
    #[error("You do not have permission to {0}")]
    Forbidden(String),
    #[error("Internal server error")]
    PasswordHash { message: String },
    #[error("User with email {0} already exists")]
    UserAlreadyExists(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Invalid identifier")]
    UuidError {
        message: String,
        #[source]
        source: uuid::Error,
    },
    #[error("{}", describe_validation(.0))]
    ValidationError(#[from] ValidationErrors),
    #[error("Internal server error")]
    ConfigurationError {
        message: String,
        #[source]
        source: figment::Error,
    },
    #[error("Internal server error")]
    Email { message: String },
    #[error("Internal server error")]
    Crypto { message: String },
    #[error("Internal server error")]
    Internal { message: String },
}

impl AppError {
    pub fn store(message: impl Into<String>, source: redis::RedisError) -> Self {
        Self::Store {
            message: message.into(),
            source,
        }
    }

    pub fn serialization(message: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            message: message.into(),
            source,
        }
    }

    pub fn uuid(message: impl Into<String>, source: uuid::Error) -> Self {
        Self::UuidError {
            message: message.into(),
            source,
        }
    }

    pub fn password_hash(message: impl Into<String>, source: password_hash::Error) -> Self {
        Self::PasswordHash {
            message: format!("{}: {}", message.into(), source),
        }
    }

    pub fn email(message: impl Into<String>) -> Self {
        Self::Email { message: message.into() }
    }

    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    pub fn forbidden(action: impl Into<String>) -> Self {
        Self::Forbidden(action.into())
    }

    pub fn not_found(entity: &str) -> Self {
        Self::NotFound(format!("{} not found", entity))
    }

    /// Infrastructure failures whose details must never reach the client.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            AppError::Store { .. }
                | AppError::Serialization { .. }
                | AppError::PasswordHash { .. }
                | AppError::ConfigurationError { .. }
                | AppError::Email { .. }
                | AppError::Crypto { .. }
                | AppError::Internal { .. }
        )
    }

    /// Message shown to the client.
    pub fn public_message(&self) -> String {
        if self.is_internal() {
            GENERIC_ERROR_MESSAGE.to_string()
        } else {
            self.to_string()
        }
    }
}

fn describe_validation(errors: &ValidationErrors) -> String {
    let mut messages = Vec::new();
    collect_validation_messages(errors, &mut messages);
    messages.sort();
    match messages.into_iter().next() {
        Some(message) => message,
        None => "Invalid request".to_string(),
    }
}

fn collect_validation_messages(errors: &ValidationErrors, out: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                for err in field_errors {
                    match &err.message {
                        Some(message) => out.push(message.to_string()),
                        None => out.push(format!("Invalid value for {}", field)),
                    }
                }
            }
            ValidationErrorsKind::Struct(nested) => collect_validation_messages(nested, out),
            ValidationErrorsKind::List(items) => {
                for nested in items.values() {
                    collect_validation_messages(nested, out);
                }
            }
        }
    }
}

impl From<password_hash::Error> for AppError {
    fn from(e: password_hash::Error) -> Self {
        AppError::password_hash("Password hashing failed", e)
    }
}

impl From<uuid::Error> for AppError {
    fn from(e: uuid::Error) -> Self {
        AppError::uuid("Invalid UUID", e)
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::store("Key-value store error", e)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::serialization("Stored record could not be (de)serialized", e)
    }
}

impl From<figment::Error> for AppError {
    fn from(e: figment::Error) -> Self {
        AppError::ConfigurationError {
            message: "Failed to read configuration".to_string(),
            source: e,
        }
    }
}

impl From<&AppError> for Status {
    fn from(e: &AppError) -> Self {
        match e {
            AppError::Store { .. } => Status::InternalServerError,
            AppError::Serialization { .. } => Status::InternalServerError,
            AppError::UserNotFound => Status::NotFound,
            AppError::Unauthorized => Status::Unauthorized,
            AppError::InvalidCredentials => Status::Unauthorized,
            AppError::EmailNotVerified => Status::Forbidden,
            AppError::InvalidTwoFactorCode => Status::Unauthorized,
            AppError::TwoFactorLocked => Status::TooManyRequests,
            AppError::Forbidden(_) => Status::Forbidden,
            AppError::PasswordHash { .. } => Status::InternalServerError,
            AppError::UserAlreadyExists(_) => Status::Conflict,
            AppError::BadRequest(_) => Status::BadRequest,
            AppError::NotFound(_) => Status::NotFound,
            AppError::Conflict(_) => Status::Conflict,
            AppError::UuidError { .. } => Status::BadRequest,
            AppError::ValidationError(_) => Status::UnprocessableEntity,
            AppError::ConfigurationError { .. } => Status::InternalServerError,
            AppError::Email { .. } => Status::InternalServerError,
            AppError::Crypto { .. } => Status::InternalServerError,
            AppError::Internal { .. } => Status::InternalServerError,
        }
    }
}

impl<'r> Responder<'r, 'static> for AppError {
    fn respond_to(self, req: &Request<'_>) -> rocket::response::Result<'static> {
        let method = req.method();
        let uri = req.uri();

        let request_id = crate::middleware::request_id_of(req);

        let user_id = req
            .local_cache(|| None::<crate::auth::CurrentUser>)
            .as_ref()
            .map(|u| u.id.to_string())
            .unwrap_or_else(|| "anonymous".to_string());

        if self.is_internal() {
            error!(
                error = ?self,
                request_id = %request_id,
                user_id = %user_id,
                method = %method,
                uri = %uri,
                "request failed"
            );
        } else {
            warn!(
                error = %self,
                request_id = %request_id,
                user_id = %user_id,
                method = %method,
                uri = %uri,
                "request rejected"
            );
        }

        let status = Status::from(&self);
        let body = json!({ "success": false, "error": self.public_message() }).to_string();

        Response::build()
            .status(status)
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

impl OpenApiResponderInner for AppError {
    fn responses(_gen: &mut OpenApiGenerator) -> Result<Responses, OpenApiError> {
        use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse};
        let mut responses = Responses::default();
        for (code, description) in [
            ("400", "Bad Request"),
            ("401", "Unauthorized"),
            ("403", "Forbidden"),
            ("404", "Not Found"),
            ("409", "Conflict"),
            ("422", "Validation Failed"),
            ("500", "Internal Server Error"),
        ] {
            responses.responses.insert(
                code.to_string(),
                RefOr::Object(OpenApiResponse {
                    description: description.to_string(),
                    ..Default::default()
                }),
            );
        }
        Ok(responses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Sample {
        #[validate(length(min = 3, message = "Name must be at least 3 characters"))]
        name: String,
    }

    #[test]
    fn validation_message_is_surfaced_verbatim() {
        let err = AppError::from(Sample { name: "ab".to_string() }.validate().unwrap_err());
        assert_eq!(err.public_message(), "Name must be at least 3 characters");
        assert_eq!(Status::from(&err), Status::UnprocessableEntity);
    }

    #[test]
    fn internal_errors_are_masked() {
        let err = AppError::email("smtp relay refused connection");
        assert_eq!(err.public_message(), GENERIC_ERROR_MESSAGE);
        assert_eq!(Status::from(&err), Status::InternalServerError);
    }

    #[test]
    fn forbidden_names_the_action() {
        let err = AppError::forbidden("delete this workspace");
        assert_eq!(err.public_message(), "You do not have permission to delete this workspace");
        assert_eq!(Status::from(&err), Status::Forbidden);
    }

    #[test]
    fn not_found_names_the_entity() {
        assert_eq!(AppError::not_found("Channel").public_message(), "Channel not found");
    }
}
