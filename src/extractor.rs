use axum::async_trait;
use subtle::ConstantTimeEq;
use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::engine::BillingEngine;
use crate::error::AppError;

/// Caller holding the operator bearer token.
pub struct Operator;

#[async_trait]
impl<S> FromRequestParts<S> for Operator
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let expected = parts
            .extensions
            .get::<BillingEngine>()
            .and_then(|engine| engine.config().operator_token.clone())
            .ok_or(AppError::Unauthorized)?;
        let provided = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;
        if !bool::from(provided.trim().as_bytes().ct_eq(expected.as_bytes())) {
            return Err(AppError::Unauthorized);
        }
        Ok(Operator)
    }
}
