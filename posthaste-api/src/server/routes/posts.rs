use crate::server::{
    Result, ServerError, ServerRouter, ServerState,
    json::{Acknowledgement, Json},
    submission::{PostFields, PostSubmission},
};
use axum::{Router, extract::State};
use axum_extra::routing::{RouterExt, TypedPath};
use posthaste_broker::client::BrokerClient;
use posthaste_common::{
    model::{
        Id, RawId,
        post::{DeletionEvent, PostEvent, PostTitle},
        tags::Tags,
        user::UserMarker,
    },
    queue::Queue,
};
use posthaste_storage::client::StorageClient;
use serde::Deserialize;
use tracing::{info, warn};

pub fn routes() -> ServerRouter {
    Router::new()
        .typed_post(send_post)
        .typed_post(delete_post)
}

#[derive(TypedPath)]
#[typed_path("/send-post")]
struct SendPostPath;

/// Everything of a post that can be checked before talking to storage or the broker.
struct ValidatedPost {
    title: PostTitle,
    content: Option<String>,
    user_id: Id<UserMarker>,
    tags: Tags,
}

impl TryFrom<PostFields> for ValidatedPost {
    type Error = ServerError;

    fn try_from(fields: PostFields) -> Result<Self> {
        let title = PostTitle::new(fields.title.unwrap_or_default())?;
        let user_id = fields
            .user_id
            .and_then(|raw| Id::try_from(raw).ok())
            .ok_or(ServerError::MissingUserId)?;
        let tags = Tags::from_field(fields.tags.as_deref())?;

        Ok(Self {
            title,
            content: fields.content,
            user_id,
            tags,
        })
    }
}

#[axum::debug_handler(state = ServerState)]
async fn send_post(
    _: SendPostPath,
    State(broker): State<BrokerClient>,
    State(storage): State<StorageClient>,
    PostSubmission { fields, image }: PostSubmission,
) -> Result<Json<Acknowledgement>> {
    let post = ValidatedPost::try_from(fields)?;

    let asset_url = match image {
        Some(bytes) => Some(storage.upload(bytes).await?),
        None => None,
    };

    let event = PostEvent {
        title: post.title,
        content: post.content,
        user_id: post.user_id,
        tags: post.tags,
        asset_url,
    };

    if let Err(err) = broker.publish(Queue::Posts, &event).await {
        if let Some(url) = &event.asset_url {
            warn!(asset_url = %url, error = %err, "Uploaded asset is orphaned, its post was not published");
        }
        return Err(err.into());
    }

    let message = format!("Message sent to '{}'", Queue::Posts);
    info!(user_id = %event.user_id, title = event.title.get(), "{message}");
    Ok(Json(Acknowledgement::new(message)))
}

#[derive(TypedPath)]
#[typed_path("/delete-post")]
struct DeletePostPath;

#[derive(Deserialize)]
struct DeletePostRequest {
    id: Option<RawId>,
}

#[axum::debug_handler(state = ServerState)]
async fn delete_post(
    _: DeletePostPath,
    State(broker): State<BrokerClient>,
    Json(request): Json<DeletePostRequest>,
) -> Result<Json<Acknowledgement>> {
    let id = request
        .id
        .and_then(|raw| Id::try_from(raw).ok())
        .ok_or(ServerError::MissingPostId)?;
    let event = DeletionEvent { id };

    broker.publish(Queue::PostsDeletion, &event).await?;

    let message = format!("Deletion sent to '{}'", Queue::PostsDeletion);
    info!(post_id = %event.id, "{message}");
    Ok(Json(Acknowledgement::new(message)))
}
