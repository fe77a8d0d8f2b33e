//! Operator authentication and tenant disambiguation extractors.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Query},
    http::request::Parts,
};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use conclave_core::models::id::ClientId;

use super::{AppError, ApiState};

pub const SECRET_HEADER: &str = "x-sfu-secret";
pub const CLIENT_HEADER: &str = "x-sfu-client";

/// Shared-secret operator authentication. Comparison is constant-time; a
/// process with no configured secret refuses the operator surface outright.
#[derive(Debug, Clone, Copy)]
pub struct OperatorAuth;

#[async_trait]
impl<S> FromRequestParts<S> for OperatorAuth
where
    S: Send + Sync,
    ApiState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = ApiState::from_ref(state);
        let expected = state.sfu.config.server.secret.as_bytes();
        if expected.is_empty() {
            return Err(AppError::service_unavailable(
                "Operator secret is not configured",
            ));
        }

        let provided = parts
            .headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("Missing x-sfu-secret header"))?;

        if provided.as_bytes().ct_eq(expected).into() {
            Ok(Self)
        } else {
            Err(AppError::unauthorized("Invalid operator secret"))
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct TenantQuery {
    #[serde(rename = "clientId")]
    client_id: Option<String>,
}

/// Optional tenant scope: `clientId` query parameter or `x-sfu-client`
/// header, query winning when both are present.
#[derive(Debug, Clone, Default)]
pub struct Tenant(pub Option<ClientId>);

#[async_trait]
impl<S> FromRequestParts<S> for Tenant
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let query: Query<TenantQuery> = Query::try_from_uri(&parts.uri)
            .map_err(|e| AppError::bad_request(format!("Invalid query string: {e}")))?;
        if let Some(client_id) = query.0.client_id {
            if !client_id.is_empty() {
                return Ok(Self(Some(ClientId::from_string(client_id))));
            }
        }

        let header = parts
            .headers
            .get(CLIENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| ClientId::from_string(v.to_string()));
        Ok(Self(header))
    }
}
