//! Paced quote publisher
//!
//! Runs a `QuoteGenerator` on a tokio task and pushes quotes into a sink at
//! a fixed rate. Pacing is computed from elapsed time rather than per-tick
//! counts, so a slow tick is made up on the next one and the long-run rate
//! does not drift.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use view_engine::bus::InMemoryBus;

use crate::generator::{Quote, QuoteGenerator};

/// Default topic quotes are published on.
pub const DEFAULT_TOPIC: &str = "market_data";

/// Pacing granularity.
const TICK: Duration = Duration::from_millis(10);

/// Publisher errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublisherError {
    #[error("publish rate must be positive")]
    InvalidRate,

    #[error("sink rejected quote: {0}")]
    Sink(String),

    #[error("publisher task failed: {0}")]
    TaskFailed(String),
}

/// Destination for generated quotes.
pub trait QuoteSink: Send + Sync + 'static {
    fn publish_quote(&self, topic: &str, quote: &Quote) -> Result<(), PublisherError>;
}

impl QuoteSink for InMemoryBus {
    fn publish_quote(&self, topic: &str, quote: &Quote) -> Result<(), PublisherError> {
        self.publish(topic, &quote.symbol, quote.fields());
        Ok(())
    }
}

impl QuoteSink for mpsc::UnboundedSender<Quote> {
    fn publish_quote(&self, _topic: &str, quote: &Quote) -> Result<(), PublisherError> {
        self.send(quote.clone())
            .map_err(|_| PublisherError::Sink("receiver closed".to_string()))
    }
}

/// Publisher configuration.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub topic: String,
    /// Quotes per second.
    pub rate_per_second: u32,
    /// RNG seed for the generator.
    pub seed: u64,
    /// Stop on its own after this many quotes.
    pub max_quotes: Option<u64>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            rate_per_second: 2000,
            seed: 0,
            max_quotes: None,
        }
    }
}

/// Spawns publisher tasks.
pub struct Publisher;

impl Publisher {
    /// Start publishing on the current tokio runtime.
    pub fn start<S: QuoteSink>(sink: Arc<S>, config: PublisherConfig) -> Result<PublisherHandle, PublisherError> {
        if config.rate_per_second == 0 {
            return Err(PublisherError::InvalidRate);
        }
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        info!(
            topic = %config.topic,
            rate_per_second = config.rate_per_second,
            seed = config.seed,
            "Publisher started"
        );
        let task = tokio::spawn(run(sink, config, shutdown_rx));
        Ok(PublisherHandle {
            shutdown: Some(shutdown_tx),
            task,
        })
    }
}

async fn run<S: QuoteSink>(
    sink: Arc<S>,
    config: PublisherConfig,
    mut shutdown: oneshot::Receiver<()>,
) -> Result<u64, PublisherError> {
    let mut generator = QuoteGenerator::new(config.seed);
    let mut ticker = interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let rate = u128::from(config.rate_per_second);
    let started = Instant::now();
    let mut published: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let mut due = (started.elapsed().as_millis() * rate / 1000) as u64;
                if let Some(max) = config.max_quotes {
                    due = due.min(max);
                }
                while published < due {
                    let quote = generator.next_quote();
                    if let Err(e) = sink.publish_quote(&config.topic, &quote) {
                        error!(published, error = %e, "Publisher stopped on sink error");
                        return Err(e);
                    }
                    published += 1;
                }
                if config.max_quotes == Some(published) {
                    debug!(published, "Quote limit reached");
                    break;
                }
            }
        }
    }

    info!(published, "Publisher stopped");
    Ok(published)
}

/// Handle to a running publisher. Dropping it stops the publisher.
pub struct PublisherHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<u64, PublisherError>>,
}

impl PublisherHandle {
    /// Stop publishing and return the number of quotes sent.
    pub async fn stop(mut self) -> Result<u64, PublisherError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.join().await
    }

    /// Wait for the publisher to finish on its own (`max_quotes` or a sink
    /// error).
    pub async fn join(self) -> Result<u64, PublisherError> {
        let PublisherHandle { shutdown, task } = self;
        let result = task
            .await
            .map_err(|e| PublisherError::TaskFailed(e.to_string()))?;
        drop(shutdown);
        result
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
