use axum::Router;

pub mod data;
pub mod health;
pub mod hook;
pub mod poll;
pub mod refresh;
pub mod worker;

#[tracing::instrument(level = "debug", skip_all)]
pub fn router(max_hook_bytes: usize) -> Router {
    Router::new()
        .merge(data::router())
        .merge(refresh::router())
        .merge(poll::router())
        .merge(hook::router(max_hook_bytes))
        .merge(worker::router())
}
