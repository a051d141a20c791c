use crate::server::{
    Result, ServerRouter,
    json::{Backlog, Json},
};
use axum::{Router, extract::State};
use axum_extra::routing::{RouterExt, TypedPath};
use posthaste_broker::client::BrokerClient;
use posthaste_common::{model::post::PostEvent, queue::Queue};
use tracing::debug;

pub fn routes() -> ServerRouter {
    Router::new().typed_get(posts_queue)
}

#[derive(TypedPath)]
#[typed_path("/posts-queue")]
struct PostsQueuePath;

/// Lists what is waiting on the `posts` queue without consuming it.
#[axum::debug_handler(state = crate::server::ServerState)]
async fn posts_queue(
    _: PostsQueuePath,
    State(broker): State<BrokerClient>,
) -> Result<Json<Backlog<PostEvent>>> {
    let messages: Vec<PostEvent> = broker.drain(Queue::Posts).await?;
    debug!(count = messages.len(), "Read posts backlog");

    Ok(Json(Backlog::new(messages)))
}
