//! Delivery of collector batches through a bounded worker pool.

use super::collector::{Collector, POLL_COUNT};
use super::transport::Transport;
use crate::core::codec::{self, PayloadEncryptor};
use crate::core::shutdown::{self, Shutdown, ShutdownTrigger};
use crate::core::{signing, DeliveryMode, Metric, MetricsError, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Turns a metric into a request body: sign, encrypt, compress.
struct Encoder {
    key: String,
    encryptor: Option<PayloadEncryptor>,
}

impl Encoder {
    fn encode_single(&self, mut metric: Metric) -> Result<Vec<u8>> {
        signing::attach(&mut metric, &self.key)?;
        let mut body = serde_json::to_vec(&metric)?;
        if let Some(encryptor) = &self.encryptor {
            match encryptor.encrypt(&body) {
                Ok(sealed) => body = sealed,
                Err(e) => warn!("Sending '{}' unencrypted: {}", metric.id, e),
            }
        }
        codec::compress(&body)
    }

    fn encode_batch(&self, metrics: Vec<Metric>) -> Result<Vec<u8>> {
        let mut signed = Vec::with_capacity(metrics.len());
        for mut metric in metrics {
            signing::attach(&mut metric, &self.key)?;
            signed.push(metric);
        }
        codec::compress(&serde_json::to_vec(&signed)?)
    }
}

/// Sends collector batches to the server.
pub struct Sender {
    transport: Arc<dyn Transport>,
    encoder: Arc<Encoder>,
    rate_limit: usize,
}

impl Sender {
    /// Sender signing with `key` (empty disables signing) and running up to
    /// `rate_limit` concurrent requests in one-by-one mode.
    pub fn new(transport: Arc<dyn Transport>, key: impl Into<String>, rate_limit: usize) -> Self {
        Self {
            transport,
            encoder: Arc::new(Encoder {
                key: key.into(),
                encryptor: None,
            }),
            rate_limit: rate_limit.max(1),
        }
    }

    /// Encrypt one-by-one payloads with the server's public key.
    pub fn with_encryptor(self, encryptor: PayloadEncryptor) -> Self {
        Self {
            encoder: Arc::new(Encoder {
                key: self.encoder.key.clone(),
                encryptor: Some(encryptor),
            }),
            ..self
        }
    }

    /// Deliver the current batch in the given mode.
    pub async fn report(
        &self,
        mode: DeliveryMode,
        collector: &Collector,
        shutdown: &Shutdown,
    ) -> Result<()> {
        match mode {
            DeliveryMode::Single => self.send_all_metrics(collector, shutdown).await,
            DeliveryMode::Batch => self.send_all_metrics_as_batch(collector).await,
        }
    }

    /// Send every metric of the current batch as its own request.
    ///
    /// `rate_limit` workers pull from one queue. The first transport error
    /// stops the remaining workers at their next queue read and is returned;
    /// requests already in flight complete. The sample counter is drained
    /// only when every request succeeded.
    pub async fn send_all_metrics(&self, collector: &Collector, shutdown: &Shutdown) -> Result<()> {
        let batch = collector.batch();
        let sent = sample_count(&batch);
        let total = batch.len();

        let (tx, rx) = mpsc::channel::<Metric>(1);
        let rx = Arc::new(Mutex::new(rx));
        let (trigger, cancel) = shutdown::channel();
        let trigger = Arc::new(trigger);

        let mut workers = JoinSet::new();
        for worker in 0..self.rate_limit {
            workers.spawn(run_worker(
                worker,
                Arc::clone(&rx),
                Arc::clone(&self.transport),
                Arc::clone(&self.encoder),
                Arc::clone(&trigger),
                cancel.clone(),
            ));
        }
        drop(rx);

        let mut interrupted = false;
        for metric in batch {
            tokio::select! {
                biased;
                _ = shutdown.triggered() => {
                    interrupted = true;
                    trigger.trigger();
                    break;
                }
                _ = cancel.triggered() => break,
                queued = tx.send(metric) => {
                    if queued.is_err() {
                        break;
                    }
                }
            }
        }
        drop(tx);

        let mut failure = None;
        while let Some(joined) = workers.join_next().await {
            let outcome = joined.map_err(MetricsError::from).and_then(|r| r);
            if let Err(e) = outcome {
                failure.get_or_insert(e);
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if interrupted {
            return Err(MetricsError::Cancelled);
        }
        collector.acknowledge_poll_count(sent);
        info!("Sent {} metrics one by one", total);
        Ok(())
    }

    /// Send the whole batch as one JSON array in one request.
    pub async fn send_all_metrics_as_batch(&self, collector: &Collector) -> Result<()> {
        let batch = collector.batch();
        let sent = sample_count(&batch);
        let total = batch.len();

        let body = self.encoder.encode_batch(batch).map_err(|e| {
            error!("Failed to encode batch: {}", e);
            e
        })?;
        self.transport.send_batch(body).await?;

        collector.acknowledge_poll_count(sent);
        info!("Sent batch of {} metrics", total);
        Ok(())
    }
}

fn sample_count(batch: &[Metric]) -> i64 {
    batch
        .iter()
        .find(|m| m.id == POLL_COUNT)
        .and_then(|m| m.delta)
        .unwrap_or(0)
}

async fn run_worker(
    worker: usize,
    queue: Arc<Mutex<mpsc::Receiver<Metric>>>,
    transport: Arc<dyn Transport>,
    encoder: Arc<Encoder>,
    trigger: Arc<ShutdownTrigger>,
    cancel: Shutdown,
) -> Result<()> {
    loop {
        let next = {
            let mut queue = queue.lock().await;
            tokio::select! {
                biased;
                _ = cancel.triggered() => None,
                metric = queue.recv() => metric,
            }
        };
        let Some(metric) = next else {
            return Ok(());
        };

        let id = metric.id.clone();
        let body = match encoder.encode_single(metric) {
            Ok(body) => body,
            // An unsent sample counter must not be drained
            Err(e) if id == POLL_COUNT => {
                error!("Failed to encode '{}': {}", id, e);
                trigger.trigger();
                return Err(e);
            },
            Err(e) => {
                error!("Skipping '{}': {}", id, e);
                continue;
            },
        };
        if let Err(e) = transport.send_metric(body).await {
            trigger.trigger();
            return Err(e);
        }
        debug!("Worker {} sent '{}'", worker, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::collector::tests::FakeProbe;
    use crate::core::codec::PayloadDecryptor;
    use parking_lot::Mutex as SyncMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingTransport {
        singles: SyncMutex<Vec<Vec<u8>>>,
        batches: SyncMutex<Vec<Vec<u8>>>,
        fail_after: Option<usize>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Transport for RecordingTransport {
        async fn send_metric(&self, body: Vec<u8>) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_after.is_some_and(|n| call >= n) {
                return Err(MetricsError::network("connection refused"));
            }
            self.singles.lock().push(body);
            Ok(())
        }

        async fn send_batch(&self, body: Vec<u8>) -> Result<()> {
            if self.fail_after.is_some() {
                return Err(MetricsError::network("connection refused"));
            }
            self.batches.lock().push(body);
            Ok(())
        }
    }

    fn sampled_collector(polls: usize) -> Collector {
        let collector = Collector::with_probe(Box::new(FakeProbe::new(1)));
        for _ in 0..polls {
            collector.collect_runtime_statistics();
        }
        collector.collect_host_utilization();
        collector
    }

    fn decode(body: &[u8]) -> Metric {
        serde_json::from_slice(&codec::decompress(body).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_one_by_one_sends_every_metric_and_drains() {
        let transport = Arc::new(RecordingTransport::default());
        let sender = Sender::new(Arc::clone(&transport) as Arc<dyn Transport>, "secret", 4);
        let collector = sampled_collector(3);
        let expected = collector.batch().len();

        sender.send_all_metrics(&collector, &Shutdown::never()).await.unwrap();

        let sent: Vec<Metric> = transport.singles.lock().iter().map(|b| decode(b)).collect();
        assert_eq!(sent.len(), expected);
        assert!(sent.iter().all(|m| signing::verify(m, "secret").is_ok() && m.hash.is_some()));
        let count = sent.iter().find(|m| m.id == POLL_COUNT).and_then(|m| m.delta);
        assert_eq!(count, Some(3));
        assert_eq!(collector.poll_count(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_keeps_counter() {
        let transport = Arc::new(RecordingTransport {
            fail_after: Some(2),
            ..RecordingTransport::default()
        });
        let sender = Sender::new(Arc::clone(&transport) as Arc<dyn Transport>, "", 2);
        let collector = sampled_collector(5);

        let result = sender.send_all_metrics(&collector, &Shutdown::never()).await;
        assert!(matches!(result, Err(MetricsError::Network(_))));
        assert_eq!(collector.poll_count(), 5);
    }

    async fn run_single_worker(metrics: Vec<Metric>) -> (Result<()>, bool, usize) {
        let transport = Arc::new(RecordingTransport::default());
        let encoder = Arc::new(Encoder {
            key: "secret".to_string(),
            encryptor: None,
        });
        let (tx, rx) = mpsc::channel(metrics.len().max(1));
        for metric in metrics {
            tx.send(metric).await.unwrap();
        }
        drop(tx);
        let (trigger, cancel) = shutdown::channel();
        let result = run_worker(
            0,
            Arc::new(Mutex::new(rx)),
            Arc::clone(&transport) as Arc<dyn Transport>,
            encoder,
            Arc::new(trigger),
            cancel.clone(),
        )
        .await;
        let sent = transport.singles.lock().len();
        (result, cancel.is_triggered(), sent)
    }

    #[tokio::test]
    async fn test_unencodable_sample_counter_fails_worker() {
        let (result, cancelled, sent) =
            run_single_worker(vec![Metric::query(POLL_COUNT, "counter"), Metric::gauge("Alloc", 1.0)]).await;
        assert!(matches!(result, Err(MetricsError::BadRequest(_))));
        assert!(cancelled);
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn test_unencodable_gauge_is_skipped() {
        let (result, cancelled, sent) =
            run_single_worker(vec![Metric::query("Broken", "gauge"), Metric::gauge("Alloc", 1.0)]).await;
        assert!(result.is_ok());
        assert!(!cancelled);
        assert_eq!(sent, 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_without_draining() {
        let transport = Arc::new(RecordingTransport::default());
        let sender = Sender::new(Arc::clone(&transport) as Arc<dyn Transport>, "", 1);
        let collector = sampled_collector(2);
        let (trigger, shutdown) = shutdown::channel();
        trigger.trigger();

        let result = sender.send_all_metrics(&collector, &shutdown).await;
        assert!(result.is_err());
        assert_eq!(collector.poll_count(), 2);
    }

    #[tokio::test]
    async fn test_batch_mode_single_request() {
        let transport = Arc::new(RecordingTransport::default());
        let sender = Sender::new(Arc::clone(&transport) as Arc<dyn Transport>, "secret", 10);
        let collector = sampled_collector(1);
        let expected = collector.batch().len();

        sender.send_all_metrics_as_batch(&collector).await.unwrap();

        let batches = transport.batches.lock();
        assert_eq!(batches.len(), 1);
        assert!(transport.singles.lock().is_empty());
        let metrics: Vec<Metric> =
            serde_json::from_slice(&codec::decompress(&batches[0]).unwrap()).unwrap();
        assert_eq!(metrics.len(), expected);
        assert!(metrics.iter().all(|m| signing::verify(m, "secret").is_ok()));
        assert_eq!(collector.poll_count(), 0);
    }

    #[tokio::test]
    async fn test_batch_failure_keeps_counter() {
        let transport = Arc::new(RecordingTransport {
            fail_after: Some(0),
            ..RecordingTransport::default()
        });
        let sender = Sender::new(Arc::clone(&transport) as Arc<dyn Transport>, "", 1);
        let collector = sampled_collector(4);

        assert!(sender.send_all_metrics_as_batch(&collector).await.is_err());
        assert_eq!(collector.poll_count(), 4);
    }

    #[tokio::test]
    async fn test_encrypted_single_payloads() {
        let mut rng = rand::thread_rng();
        let decryptor = PayloadDecryptor::new(rsa::RsaPrivateKey::new(&mut rng, 1024).unwrap());
        let transport = Arc::new(RecordingTransport::default());
        let sender = Sender::new(Arc::clone(&transport) as Arc<dyn Transport>, "", 2)
            .with_encryptor(PayloadEncryptor::new(decryptor.public_key()));
        let collector = sampled_collector(1);

        sender.send_all_metrics(&collector, &Shutdown::never()).await.unwrap();

        for body in transport.singles.lock().iter() {
            let sealed = codec::decompress(body).unwrap();
            let plain = decryptor.decrypt(&sealed).unwrap();
            let metric: Metric = serde_json::from_slice(&plain).unwrap();
            assert!(metric.kind.is_known());
        }
    }
}
