//! Custom Axum extractors.
//!
//! - `IdempotencyKey`: the key of a request admitted by
//!   [`IdempotencyLayer`](crate::IdempotencyLayer)
//!
//! # Examples
//!
//! ```ignore
//! use idempotent_request_web::IdempotencyKey;
//!
//! async fn create_order(
//!     key: IdempotencyKey,
//!     Json(order): Json<NewOrder>,
//! ) -> Result<Json<Order>, AppError> {
//!     tracing::info!(idempotency_key = %key.0, "Creating order");
//!     Ok(Json(order.place()))
//! }
//! ```

use crate::error::AppError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Idempotency key of the current request.
///
/// Populated by the layer; rejects with 400 when the request carried no
/// key. Use `Option<IdempotencyKey>` on routes where the key is optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyKey(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyKey
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| AppError::bad_request("Idempotency-Key is missing"))
    }
}
