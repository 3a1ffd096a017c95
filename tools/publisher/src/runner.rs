//! Live grid run loop
//!
//! Wires a publisher and a session driver to one bus, logs the grid once a
//! second, and swaps the filter halfway through. The run ends at the
//! configured deadline or when `shutdown` resolves, whichever is first.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, Instant};
use tracing::{info, warn};
use view_engine::{InMemoryBus, SessionDriver};

use crate::config::GridConfig;
use crate::publisher::Publisher;
use crate::render::render_rows;

/// Filter applied halfway through a run started without one.
pub const DEMO_FILTER: &str = "/bid > 600";

/// Rows logged per refresh.
const ROWS_SHOWN: usize = 10;

const REFRESH: Duration = Duration::from_secs(1);

/// Outcome of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub published: u64,
    /// Ended by `shutdown` rather than the deadline.
    pub interrupted: bool,
    pub filter_changed: bool,
    pub metrics: BTreeMap<String, u64>,
}

/// Run the live grid against `bus` until the deadline or `shutdown`.
pub async fn run_grid<F>(
    config: &GridConfig,
    bus: Arc<InMemoryBus>,
    shutdown: F,
) -> Result<RunSummary, anyhow::Error>
where
    F: Future<Output = ()>,
{
    let publisher = Publisher::start(Arc::clone(&bus), config.publisher_config())?;
    let driver = SessionDriver::spawn(bus, config.session_config());

    // Polled across iterations so a signal raised mid-tick is not lost.
    tokio::pin!(shutdown);

    let started = Instant::now();
    let halfway = config.run_for / 2;
    let mut filter_changed = false;
    let mut interrupted = false;
    let mut refresh = interval(REFRESH);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Interrupted");
                interrupted = true;
                break;
            }
            _ = refresh.tick() => {
                let elapsed = started.elapsed();
                if elapsed >= config.run_for {
                    break;
                }

                if !filter_changed && elapsed >= halfway {
                    let next = match config.filter {
                        Some(_) => None,
                        None => Some(DEMO_FILTER.to_string()),
                    };
                    info!(filter = next.as_deref().unwrap_or(""), "Changing filter");
                    if let Err(e) = driver.change_filter(next).await {
                        warn!(error = %e, "Filter change failed");
                    }
                    filter_changed = true;
                }

                let snapshot = driver.current();
                info!(
                    state = ?snapshot.state,
                    connection = ?snapshot.connection,
                    rows = snapshot.view.len(),
                    version = snapshot.view.version(),
                    "Grid"
                );
                for line in render_rows(&snapshot.view, ROWS_SHOWN) {
                    info!("  {}", line);
                }
            }
        }
    }

    let published = publisher.stop().await?;
    let metrics = driver.metrics().export();
    driver.shutdown().await?;

    Ok(RunSummary {
        published,
        interrupted,
        filter_changed,
        metrics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn short_run(run_secs: u64) -> GridConfig {
        GridConfig {
            run_for: Duration::from_secs(run_secs),
            publish_rate: 500,
            ..GridConfig::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_to_deadline_and_changes_filter() {
        let bus = Arc::new(InMemoryBus::with_defaults());
        let summary = run_grid(&short_run(4), Arc::clone(&bus), std::future::pending())
            .await
            .unwrap();

        assert!(!summary.interrupted);
        assert!(summary.filter_changed);
        assert!(summary.published > 0);
        assert_eq!(summary.metrics["subscribe_calls"], 2);
        assert_eq!(bus.subscription_count(), 0);
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_raised_during_filter_change_ends_run() {
        let bus = Arc::new(InMemoryBus::with_defaults());
        let (tx, rx) = oneshot::channel::<()>();
        let shutdown = async move {
            let _ = rx.await;
        };

        // Fire on the same tick that performs the filter change.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            let _ = tx.send(());
        });

        let started = Instant::now();
        let summary = run_grid(&short_run(60), Arc::clone(&bus), shutdown)
            .await
            .unwrap();

        assert!(summary.interrupted);
        assert!(started.elapsed() < Duration::from_secs(32));
        assert_eq!(bus.subscription_count(), 0);
    }
}
