//! JSON bodies and the `{success, ...}` envelopes every route replies with.

use crate::server::ServerError;
use axum::{
    Json as AxumJson,
    extract::FromRequest,
    response::{IntoResponse, Response},
};
use axum_extra::TypedHeader;
use headers::ContentType;
use serde::Serialize;

#[derive(FromRequest, Debug, Clone, Copy, Default)]
#[from_request(via(AxumJson), rejection(ServerError))]
pub struct Json<T>(pub T);

impl<T: Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec(&self.0) {
            Ok(json) => (TypedHeader(ContentType::json()), json).into_response(),
            Err(err) => ServerError::JsonResponse(err).into_response(),
        }
    }
}

/// `{"success": true, "message": ...}`
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct Acknowledgement {
    success: bool,
    message: String,
}

impl Acknowledgement {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// `{"success": true, "messages": [...]}`
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct Backlog<T> {
    success: bool,
    messages: Vec<T>,
}

impl<T> Backlog<T> {
    pub fn new(messages: Vec<T>) -> Self {
        Self {
            success: true,
            messages,
        }
    }
}

/// `{"success": false, "error": ...}`
#[derive(Clone, Eq, PartialEq, Debug, Hash, Serialize)]
pub struct Failure {
    success: bool,
    error: String,
}

impl Failure {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}
