//! Drain endpoint: `/drain` and its `/admin/drain` alias.

use axum::{extract::State, Json};

use conclave_core::service::drain::{self, DrainOutcome, DrainRequest};

use super::{ApiState, AppResult, OperatorAuth};

pub async fn apply(
    _auth: OperatorAuth,
    State(state): State<ApiState>,
    Json(req): Json<DrainRequest>,
) -> AppResult<Json<DrainOutcome>> {
    let outcome = drain::apply_drain(
        &state.sfu.registry,
        state.sfu.bus.as_ref(),
        &state.sfu.drain,
        req,
    )
    .await;
    Ok(Json(outcome))
}
