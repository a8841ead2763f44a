use askama::Template;
use axum::{extract::State, http::StatusCode, response::Html};
use std::sync::Arc;

use crate::model::{MetricRecord, Snapshot};
use crate::storage::with_deadline;
use crate::AppState;

use super::AppError;

#[derive(Template)]
#[template(path = "metrics.html")]
struct MetricsTemplate {
    records: Vec<MetricRecord>,
}

fn render<T: Template>(tmpl: T) -> Html<String> {
    Html(tmpl.render().unwrap_or_else(|e| {
        format!("<pre>Template error: {e}</pre>")
    }))
}

// ─── GET / ───────────────────────────────────────────────────────

/// Human-readable list of every metric.
pub async fn list_metrics(State(state): State<Arc<AppState>>) -> Result<Html<String>, AppError> {
    let snapshot = with_deadline(state.request_timeout, state.store.get_metrics()).await?;
    Ok(render(listing(snapshot)))
}

fn listing(snapshot: Snapshot) -> MetricsTemplate {
    MetricsTemplate {
        records: snapshot.into_values().collect(),
    }
}

// ─── GET /ping ───────────────────────────────────────────────────

pub async fn ping(State(state): State<Arc<AppState>>) -> Result<StatusCode, AppError> {
    with_deadline(state.request_timeout, state.store.ping()).await?;
    Ok(StatusCode::OK)
}
