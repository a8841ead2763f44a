use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::debug;

use crate::model::{MetricKind, MetricRecord, Metrics};
use crate::storage::with_deadline;
use crate::AppState;

use super::AppError;

// ─── POST /update/:kind/:name/:value ─────────────────────────────

pub async fn update_from_path(
    State(state): State<Arc<AppState>>,
    Path((kind, name, raw)): Path<(String, String, String)>,
) -> Result<StatusCode, AppError> {
    let record = parse_path_record(&kind, &name, &raw)?;
    with_deadline(state.request_timeout, state.store.apply(&record)).await?;
    debug!(%kind, %name, value = %record.value, "metric updated");
    Ok(StatusCode::OK)
}

/// Validate the three path segments before anything reaches the store.
fn parse_path_record(kind: &str, name: &str, raw: &str) -> Result<MetricRecord, AppError> {
    let kind: MetricKind = kind.parse()?;
    if name.is_empty() {
        return Err(AppError::NotFound("metric name missing".into()));
    }
    match kind {
        MetricKind::Counter => raw
            .parse::<i64>()
            .map(|d| MetricRecord::counter(name, d))
            .map_err(|_| AppError::BadRequest(format!("'{raw}' is not an integer delta"))),
        MetricKind::Gauge => raw
            .parse::<f64>()
            .map(|v| MetricRecord::gauge(name, v))
            .map_err(|_| AppError::BadRequest(format!("'{raw}' is not a number"))),
    }
}

// ─── POST /update/ ───────────────────────────────────────────────

/// Apply one JSON metric and answer with its stored value.
pub async fn update_from_json(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Metrics>, JsonRejection>,
) -> Result<Json<Metrics>, AppError> {
    let Json(body) = body?;
    let record = MetricRecord::try_from(body)?;

    let stored = with_deadline(state.request_timeout, async {
        state.store.apply(&record).await?;
        state.store.get_metric(&record.name, record.kind()).await
    })
    .await?
    .ok_or_else(|| AppError::NotFound(record.name.clone()))?;

    Ok(Json(Metrics::from(&stored)))
}

// ─── POST /updates/ ──────────────────────────────────────────────

/// Apply a whole batch, typically a full snapshot pushed by an agent.
/// Every record is validated before the first one is applied.
pub async fn update_batch(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Vec<Metrics>>, JsonRejection>,
) -> Result<StatusCode, AppError> {
    let Json(body) = body?;
    let batch = body
        .into_iter()
        .map(MetricRecord::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    with_deadline(state.request_timeout, state.store.update_metrics(&batch)).await?;
    debug!(records = batch.len(), "batch applied");
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_segments_are_validated() {
        assert!(matches!(
            parse_path_record("counter", "PollCount", "1"),
            Ok(r) if r == MetricRecord::counter("PollCount", 1)
        ));
        assert!(matches!(
            parse_path_record("gauge", "Alloc", "42.5"),
            Ok(r) if r == MetricRecord::gauge("Alloc", 42.5)
        ));
        assert!(matches!(
            parse_path_record("counter", "PollCount", "1.5"),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            parse_path_record("gauge", "Alloc", "none"),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            parse_path_record("summary", "x", "1"),
            Err(AppError::NotImplemented(_))
        ));
    }
}
