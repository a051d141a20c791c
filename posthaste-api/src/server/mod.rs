use axum::{
    Router,
    extract::{
        DefaultBodyLimit, FromRef, Request,
        multipart::{MultipartError, MultipartRejection},
        rejection::JsonRejection,
    },
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use json::{Failure, Json};
use posthaste_broker::client::{BrokerClient, BrokerError};
use posthaste_common::model::{post::EmptyTitleError, tags::InvalidTagsError};
use posthaste_storage::client::{StorageClient, StorageError};
use thiserror::Error;
use tracing::error;

mod json;
mod routes;
mod submission;

pub type ServerRouter = Router<ServerState>;

#[derive(Clone, FromRef)]
pub struct ServerState {
    pub broker: BrokerClient,
    pub storage: StorageClient,
}

pub fn routes() -> ServerRouter {
    routes::routes().fallback(fallback)
}

/// All routes bound to `state`, refusing request bodies above `max_body_bytes`.
pub fn router(state: ServerState, max_body_bytes: usize) -> Router {
    routes()
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
}

pub async fn fallback(request: Request) -> ServerError {
    ServerError::UnknownRoute(request.into_parts().0.uri)
}

pub type Result<T, E = ServerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Unknown route requested: {0}")]
    UnknownRoute(Uri),
    #[error("Incoming JSON rejected: {0}")]
    JsonRejection(#[from] JsonRejection),
    #[error("Incoming form rejected: {0}")]
    MultipartRejection(#[from] MultipartRejection),
    #[error("Incoming form could not be read: {0}")]
    Multipart(#[from] MultipartError),
    #[error("JSON response could not be serialized: {0}")]
    JsonResponse(#[from] serde_json::Error),
    #[error(transparent)]
    MissingTitle(#[from] EmptyTitleError),
    #[error("User ID is required")]
    MissingUserId,
    #[error("Post ID is required")]
    MissingPostId,
    #[error(transparent)]
    InvalidTags(#[from] InvalidTagsError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::UnknownRoute(_) => StatusCode::NOT_FOUND,
            ServerError::JsonRejection(rejection)
                if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE =>
            {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ServerError::MultipartRejection(rejection)
                if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE =>
            {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ServerError::Multipart(err) if err.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ServerError::JsonRejection(_)
            | ServerError::MultipartRejection(_)
            | ServerError::Multipart(_)
            | ServerError::MissingTitle(_)
            | ServerError::MissingUserId
            | ServerError::MissingPostId
            | ServerError::InvalidTags(_) => StatusCode::BAD_REQUEST,
            ServerError::JsonResponse(_) | ServerError::Storage(_) | ServerError::Broker(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();

        error!(error = %self, %status, "Replying with error");

        (status, Json(Failure::new(self.to_string()))).into_response()
    }
}
