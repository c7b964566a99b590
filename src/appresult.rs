use axum::{http::StatusCode, response::{IntoResponse, Response}};

use crate::{chat::BroadcasterError, domain::RegistryError};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn status(&self) -> StatusCode {
        if let Some(err) = self.0.downcast_ref::<RegistryError>() {
            return match err {
                RegistryError::UnknownUser(_) | RegistryError::UnknownRoom(_) => StatusCode::NOT_FOUND,
                RegistryError::DuplicateUser(_) | RegistryError::DuplicateRoom(_) => StatusCode::CONFLICT,
            };
        }
        if let Some(err) = self.0.downcast_ref::<BroadcasterError>() {
            return match err {
                BroadcasterError::AlreadyRegistered(_) => StatusCode::FORBIDDEN,
                BroadcasterError::Closed => StatusCode::SERVICE_UNAVAILABLE,
            };
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
            return (
                status,
                format!("{}\n\n{}", self.0, self.0.backtrace()),
            )
                .into_response();
        }

        tracing::debug!(status = %status, error = %self.0, "request rejected");
        (status, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
