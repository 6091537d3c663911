//! Periodic poll and report loops.

use super::collector::Collector;
use super::sender::Sender;
use crate::core::{DeliveryMode, MetricsError, Result, Shutdown};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Runs the collector and the sender on independent timers.
pub struct Scheduler {
    collector: Arc<Collector>,
    sender: Arc<Sender>,
    poll_interval: Duration,
    report_interval: Duration,
    delivery_mode: DeliveryMode,
}

impl Scheduler {
    /// Scheduler driving `collector` and `sender` with the given settings.
    pub fn new(
        collector: Arc<Collector>,
        sender: Arc<Sender>,
        poll_interval: Duration,
        report_interval: Duration,
        delivery_mode: DeliveryMode,
    ) -> Self {
        Self {
            collector,
            sender,
            poll_interval,
            report_interval,
            delivery_mode,
        }
    }

    /// Run both loops until `shutdown` fires.
    pub async fn run(&self, shutdown: Shutdown) -> Result<()> {
        let poll = tokio::spawn(poll_loop(
            Arc::clone(&self.collector),
            self.poll_interval,
            shutdown.clone(),
        ));
        let report = tokio::spawn(report_loop(
            Arc::clone(&self.collector),
            Arc::clone(&self.sender),
            self.delivery_mode,
            self.report_interval,
            shutdown,
        ));

        let (poll, report) = tokio::join!(poll, report);
        poll?;
        report?;
        info!("Scheduler stopped");
        Ok(())
    }
}

/// Sample runtime and host statistics every `interval`.
pub async fn poll_loop(collector: Arc<Collector>, interval: Duration, shutdown: Shutdown) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                collector.collect_runtime_statistics();
                collector.collect_host_utilization();
            }
            _ = shutdown.triggered() => {
                info!("Poll loop shutting down");
                break;
            }
        }
    }
}

/// Deliver the collector's batch every `interval`.
///
/// Failures are logged; the next tick retries with whatever has been
/// sampled by then. In-flight requests are not aborted by shutdown.
pub async fn report_loop(
    collector: Arc<Collector>,
    sender: Arc<Sender>,
    mode: DeliveryMode,
    interval: Duration,
    shutdown: Shutdown,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; wait a full interval before reporting
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match sender.report(mode, &collector, &shutdown).await {
                    Ok(()) => {},
                    Err(MetricsError::Cancelled) => warn!("Report interrupted by shutdown"),
                    Err(e) if e.is_recoverable() => warn!("Report failed, will retry: {}", e),
                    Err(e) => error!("Report failed ({}): {}", e.category(), e),
                }
            }
            _ = shutdown.triggered() => {
                info!("Report loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::collector::tests::FakeProbe;
    use crate::agent::transport::Transport;
    use crate::core::shutdown;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTransport {
        batches: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Transport for CountingTransport {
        async fn send_metric(&self, _body: Vec<u8>) -> Result<()> {
            Ok(())
        }

        async fn send_batch(&self, _body: Vec<u8>) -> Result<()> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_loops_tick_and_stop() {
        let collector = Arc::new(Collector::with_probe(Box::new(FakeProbe::new(1))));
        let transport = Arc::new(CountingTransport::default());
        let sender = Arc::new(Sender::new(Arc::clone(&transport) as Arc<dyn Transport>, "", 1));
        let scheduler = Scheduler::new(
            Arc::clone(&collector),
            sender,
            Duration::from_secs(2),
            Duration::from_secs(10),
            DeliveryMode::Batch,
        );

        let (trigger, shutdown) = shutdown::channel();
        let run = tokio::spawn(async move { scheduler.run(shutdown).await });

        tokio::time::sleep(Duration::from_secs(25)).await;
        trigger.trigger();
        run.await.unwrap().unwrap();

        assert_eq!(transport.batches.load(Ordering::SeqCst), 2);
        // Polls at 0..=24s, minus what the two reports drained
        assert!(collector.poll_count() > 0);
    }
}
