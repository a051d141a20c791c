use crate::server::{Result, ServerError, json::Json};
use axum::{
    extract::{FromRequest, Multipart, Request},
    http::header::CONTENT_TYPE,
};
use bytes::Bytes;
use posthaste_common::model::RawId;
use serde::Deserialize;
use tracing::debug;

const IMAGE_FIELD: &str = "image";

/// The text fields of a post submission, none of them validated yet.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostFields {
    pub title: Option<String>,
    pub user_id: Option<RawId>,
    pub content: Option<String>,
    /// JSON encoded array of strings.
    pub tags: Option<String>,
}

/// A post as submitted, either as a multipart form that may carry an `image` file or as a
/// JSON object with the same text fields.
#[derive(Clone, Debug, Default)]
pub struct PostSubmission {
    pub fields: PostFields,
    pub image: Option<Bytes>,
}

impl PostSubmission {
    async fn from_multipart(mut multipart: Multipart) -> Result<Self> {
        let mut submission = Self::default();

        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(ToOwned::to_owned) else {
                continue;
            };

            match name.as_str() {
                "title" => submission.fields.title = Some(field.text().await?),
                "userId" => submission.fields.user_id = Some(RawId::Text(field.text().await?)),
                "content" => submission.fields.content = Some(field.text().await?),
                "tags" => submission.fields.tags = Some(field.text().await?),
                IMAGE_FIELD => {
                    let bytes = field.bytes().await?;
                    // Browsers send an empty part when no file was picked.
                    submission.image = (!bytes.is_empty()).then_some(bytes);
                }
                _ => debug!(field = %name, "Ignoring unknown form field"),
            }
        }

        Ok(submission)
    }
}

fn is_multipart(request: &Request) -> bool {
    request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"))
}

impl<S> FromRequest<S> for PostSubmission
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(request: Request, state: &S) -> Result<Self> {
        if is_multipart(&request) {
            let multipart = Multipart::from_request(request, state).await?;
            Self::from_multipart(multipart).await
        } else {
            let Json(fields) = Json::<PostFields>::from_request(request, state).await?;
            Ok(Self {
                fields,
                image: None,
            })
        }
    }
}
