use crate::server::ServerRouter;
use axum::Router;

mod posts;
mod queue;

pub fn routes() -> ServerRouter {
    Router::new().merge(posts::routes()).merge(queue::routes())
}
