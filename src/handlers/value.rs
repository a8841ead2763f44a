use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use std::sync::Arc;

use crate::model::{MetricKind, MetricRecord, Metrics};
use crate::storage::with_deadline;
use crate::AppState;

use super::AppError;

async fn lookup(state: &AppState, name: &str, kind: MetricKind) -> Result<MetricRecord, AppError> {
    with_deadline(state.request_timeout, state.store.get_metric(name, kind))
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{kind} '{name}' not found")))
}

// ─── GET /value/:kind/:name ──────────────────────────────────────

/// Bare value as text, e.g. `42` or `10.5`.
pub async fn value_as_text(
    State(state): State<Arc<AppState>>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<String, AppError> {
    let kind: MetricKind = kind.parse()?;
    let record = lookup(&state, &name, kind).await?;
    Ok(record.value.to_string())
}

// ─── POST /value/ ────────────────────────────────────────────────

/// Body names the identity (`id`, `type`); answers with the full record.
pub async fn value_as_json(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Metrics>, JsonRejection>,
) -> Result<Json<Metrics>, AppError> {
    let Json(body) = body?;
    let id = body.identity()?;
    let record = lookup(&state, &id.name, id.kind).await?;
    Ok(Json(Metrics::from(&record)))
}
