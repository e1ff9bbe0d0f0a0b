//! Feed generator XRPC endpoints.

use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use crate::algos::{DEFAULT_LIMIT, FeedCursor, FeedParams, FeedSkeleton, MAX_LIMIT};
use crate::error::ApiError;
use crate::state::AppState;

/// Collection NSID of feed generator records.
const FEED_GENERATOR_COLLECTION: &str = "app.bsky.feed.generator";

/// Raw `getFeedSkeleton` query. Numbers are parsed by hand so bad input
/// gets an XRPC error body.
#[derive(Debug, Deserialize)]
pub struct SkeletonQuery {
    pub feed: String,
    pub limit: Option<String>,
    pub cursor: Option<String>,
}

fn parse_limit(raw: Option<&str>) -> Result<u32, ApiError> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_LIMIT);
    };

    let limit: u32 = raw
        .parse()
        .map_err(|_| ApiError::InvalidRequest(format!("limit must be an integer, got {raw:?}")))?;

    if limit == 0 {
        return Err(ApiError::InvalidRequest("limit must be at least 1".into()));
    }

    Ok(limit.min(MAX_LIMIT))
}

/// Short name of the feed if `uri` names a generator record of `publisher`.
fn feed_short_name<'a>(uri: &'a str, publisher: &str) -> Option<&'a str> {
    let rest = uri.strip_prefix("at://")?;
    let mut parts = rest.splitn(3, '/');
    let (did, collection, rkey) = (parts.next()?, parts.next()?, parts.next()?);

    (did == publisher && collection == FEED_GENERATOR_COLLECTION && !rkey.is_empty())
        .then_some(rkey)
}

/// `GET /xrpc/app.bsky.feed.getFeedSkeleton`
pub async fn get_feed_skeleton(
    State(state): State<AppState>,
    Query(query): Query<SkeletonQuery>,
) -> Result<Json<FeedSkeleton>, ApiError> {
    let handler = feed_short_name(&query.feed, &state.config.publisher_did)
        .and_then(|name| state.algos.get(name))
        .ok_or_else(|| ApiError::UnsupportedAlgorithm(query.feed.clone()))?;

    let params = FeedParams {
        limit: parse_limit(query.limit.as_deref())?,
        cursor: query.cursor.as_deref().map(FeedCursor::parse).transpose()?,
    };

    let conn = state.db.lock();
    let skeleton = handler(&conn, &params)?;

    Ok(Json(skeleton))
}

/// One advertised feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedDescription {
    pub uri: String,
}

/// `describeFeedGenerator` output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeResponse {
    pub did: String,
    pub feeds: Vec<FeedDescription>,
}

/// `GET /xrpc/app.bsky.feed.describeFeedGenerator`
pub async fn describe_feed_generator(State(state): State<AppState>) -> Json<DescribeResponse> {
    let feeds = state
        .algos
        .names()
        .into_iter()
        .map(|name| FeedDescription {
            uri: state.config.feed_uri(name),
        })
        .collect();

    Json(DescribeResponse {
        did: state.config.service_did.clone(),
        feeds,
    })
}

/// `GET /.well-known/did.json`
///
/// Only meaningful for `did:web` service identities.
pub async fn did_document(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let hostname = state
        .config
        .service_did
        .strip_prefix("did:web:")
        .ok_or_else(|| ApiError::InvalidRequest("service DID is not a did:web".into()))?;

    Ok(Json(serde_json::json!({
        "@context": ["https://www.w3.org/ns/did/v1"],
        "id": state.config.service_did,
        "service": [{
            "id": "#bsky_fg",
            "type": "BskyFeedGenerator",
            "serviceEndpoint": format!("https://{hostname}"),
        }],
    })))
}
