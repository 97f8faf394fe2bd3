//! Authentication proper is out of scope (spec.md §1, §5): the core
//! neither issues nor verifies credentials. Every driver-facing route
//! still needs *a* caller identity to enforce the ownership checks
//! `dispatch-mission`/`dispatch-assignment` already require, so this is a
//! minimal stand-in — the caller's id is read straight off a header - that
//! a real deployment would replace with whatever session/JWT middleware
//! sits in front of this service.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use dispatch_common::DispatchError;
use uuid::Uuid;

use crate::error::ApiError;

pub struct DriverIdentity(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for DriverIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get("x-driver-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError(DispatchError::Authorization("missing X-Driver-Id header".into())))?;
        let id = Uuid::parse_str(raw)
            .map_err(|_| ApiError(DispatchError::Authorization("X-Driver-Id header is not a uuid".into())))?;
        Ok(DriverIdentity(id))
    }
}

/// Same stand-in as `DriverIdentity`, for the `/admin/*` routes.
pub struct AdminIdentity(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AdminIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get("x-admin-id")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError(DispatchError::Authorization("missing X-Admin-Id header".into())))?;
        let id = Uuid::parse_str(raw)
            .map_err(|_| ApiError(DispatchError::Authorization("X-Admin-Id header is not a uuid".into())))?;
        Ok(AdminIdentity(id))
    }
}
