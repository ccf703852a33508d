/// API routes and handlers
pub mod activities;
pub mod albums;
pub mod assets;
pub mod health;
pub mod middleware;
pub mod shared_links;
pub mod sync;

use crate::{
    context::AppContext,
    error::{MediaError, MediaResult},
};
use axum::Router;
use validator::Validate;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(health::routes())
        .merge(assets::routes())
        .merge(sync::routes())
        .merge(activities::routes())
        .merge(albums::routes())
        .merge(shared_links::routes())
}

/// Run `validator` rules on a request body
pub(crate) fn validated<T: Validate>(input: T) -> MediaResult<T> {
    input
        .validate()
        .map_err(|e| MediaError::Validation(e.to_string()))?;
    Ok(input)
}
