//! API route definitions.

mod feed;
mod health;

use axum::Router;
use axum::routing::get;

use crate::state::AppState;

/// Build the complete API router.
///
/// # Route Structure
///
/// - `GET /health` - Health check
/// - `GET /.well-known/did.json` - DID document for `did:web` services
/// - `GET /xrpc/app.bsky.feed.getFeedSkeleton` - One page of a feed
/// - `GET /xrpc/app.bsky.feed.describeFeedGenerator` - Feeds served here
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/.well-known/did.json", get(feed::did_document))
        .route(
            "/xrpc/app.bsky.feed.getFeedSkeleton",
            get(feed::get_feed_skeleton),
        )
        .route(
            "/xrpc/app.bsky.feed.describeFeedGenerator",
            get(feed::describe_feed_generator),
        )
        .with_state(state)
}
