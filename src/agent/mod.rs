//! Producer side: sample on one cadence, push the whole buffer on another.
//!
//! ```text
//! poll tick   ── Poller::poll ──▶ MemoryStore (local buffer)
//! report tick ── Reporter::report ◀── snapshot ──┘ ──▶ POST /updates/
//! ```

pub mod poller;
pub mod reporter;

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

pub use poller::Poller;
pub use reporter::{ReportError, Reporter};

use crate::storage::{MemoryStore, Store};

/// Run both loops until `shutdown` flips, then try one last report.
pub async fn run(
    buffer: &MemoryStore,
    poller: &Poller,
    reporter: &Reporter,
    poll_every: Duration,
    report_every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        poll_secs = poll_every.as_secs(),
        report_secs = report_every.as_secs(),
        "agent started"
    );

    let mut poll_tick = tokio::time::interval(poll_every);
    poll_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut report_tick = tokio::time::interval(report_every);
    report_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // nothing to send before the first sample
    report_tick.tick().await;

    loop {
        tokio::select! {
            _ = poll_tick.tick() => {
                if let Err(e) = poller.poll(buffer).await {
                    warn!(error = %e, "poll failed");
                }
            }
            _ = report_tick.tick() => {
                deliver(buffer, reporter).await;
            }
            _ = shutdown.changed() => {
                info!("agent shutting down");
                deliver(buffer, reporter).await;
                break;
            }
        }
    }
}

async fn deliver(buffer: &dyn Store, reporter: &Reporter) {
    match reporter.report(buffer).await {
        Ok(sent) => info!(records = sent, "metrics reported"),
        // buffer untouched, next cycle resends the then-current state
        Err(e) => warn!(error = %e, "report failed"),
    }
}
