//! Acting-user extraction.
//!
//! Session handling lives in front of this service; it forwards the
//! authenticated username in [`PRINCIPAL_HEADER`].

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;

pub const PRINCIPAL_HEADER: &str = "x-bookswap-user";

/// The authenticated user on whose behalf a request runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

impl Principal {
    pub fn username(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(PRINCIPAL_HEADER)
            .ok_or_else(|| {
                AppError::unauthorized("you need to be a registered user to trade books")
            })?;

        let username = value
            .to_str()
            .map_err(|_| AppError::unauthorized("malformed principal header"))?
            .trim();

        if username.is_empty() {
            return Err(AppError::unauthorized("empty principal header"));
        }

        Ok(Principal(username.to_string()))
    }
}
