//! Periodic filter index refresh.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{error, info, info_span, Instrument};

use crate::database_ops::filter_index::PublishOutcome;
use crate::engine::VariationEngine;
use crate::util::env::EngineConfig;

#[derive(Debug, Clone)]
pub struct RefreshLoopConfig {
    pub interval: Duration,
    /// Stop after this many ticks; `None` runs until shutdown.
    pub max_runs: Option<u64>,
}

impl RefreshLoopConfig {
    pub fn from_env() -> Self {
        Self {
            interval: EngineConfig::from_env().refresh_interval,
            max_runs: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshLoopStats {
    pub runs: u64,
    pub published: u64,
    pub skipped: u64,
    pub failures: u64,
    pub last_run_ms: u64,
    pub last_error: Option<String>,
}

/// Tick `try_refresh` until shutdown or `max_runs`. A failed tick is logged
/// and the live index stays as it was; the loop keeps going.
pub async fn run(
    engine: Arc<VariationEngine>,
    cfg: RefreshLoopConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> RefreshLoopStats {
    let mut stats = RefreshLoopStats::default();
    // drift-free interval; immediate first tick
    let mut ticker = tokio::time::interval(cfg.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.recv() => {
                info!("refresh loop: shutdown received");
                break;
            }
        }

        let t_run = Instant::now();
        let outcome = engine
            .try_refresh()
            .instrument(info_span!("variations.refresh_tick", run = stats.runs + 1))
            .await;
        stats.runs += 1;
        stats.last_run_ms = t_run.elapsed().as_millis() as u64;
        match outcome {
            Ok(Some(report)) => {
                if matches!(report.outcome, PublishOutcome::Published { .. }) {
                    stats.published += 1;
                }
                info!(
                    elapsed_ms = stats.last_run_ms,
                    version = report.outcome.version(),
                    entries = report.entries,
                    "refresh loop: tick complete"
                );
            }
            Ok(None) => stats.skipped += 1,
            Err(e) => {
                error!(error = %e, "refresh loop: tick failed");
                stats.failures += 1;
                stats.last_error = Some(e.to_string());
            }
        }

        if cfg.max_runs.is_some_and(|max| stats.runs >= max) {
            break;
        }
    }
    info!(
        runs = stats.runs,
        published = stats.published,
        skipped = stats.skipped,
        failures = stats.failures,
        "refresh loop stopped"
    );
    stats
}
