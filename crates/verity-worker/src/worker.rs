//! Single worker process loop
//!
//! One worker owns one consumer identity on one stream and runs one job at
//! a time:
//! - entries left pending by a previous run are failed and acknowledged
//! - new entries are read one by one and processed to completion
//! - an entry is acknowledged only once its final update is stored
//! - task workers listen for cancel and algorithm lifecycle messages

use crate::control::{ControlHandler, RunningSlot};
use crate::error::{WorkerError, WorkerResult};
use crate::role::WorkerRole;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};
use verity_backend::Backend;
use verity_broker::{Broker, StreamConsumer, StreamEntry, Subscription};
use verity_core::{ChannelConfig, JobOrigin, VerityConfig};
use verity_engine::{cancel_pair, Engine, JobOutcome, UpdateSink};
use verity_telemetry::JobLogContext;

/// What happened to a delivered entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Final update stored and entry acknowledged
    Acked,
    /// Final update could not be stored, the entry stays pending
    Withheld,
    /// Nothing reportable, acknowledged and alerted
    Dropped,
}

pub struct Worker<B: Broker, S: Backend> {
    role: WorkerRole,
    broker: B,
    backend: S,
    engine: Arc<Engine>,
    group: String,
    consumer_name: String,
    stream: String,
    read_block: Duration,
    channels: ChannelConfig,
    slot: RunningSlot,
}

impl<B: Broker, S: Backend> Worker<B, S> {
    pub fn new(
        role: WorkerRole,
        broker: B,
        backend: S,
        engine: Arc<Engine>,
        config: &VerityConfig,
        index: usize,
    ) -> Self {
        Self {
            role,
            broker,
            backend,
            engine,
            group: config.broker.consumer_group.clone(),
            consumer_name: config.worker.consumer_name(index),
            stream: role.stream(&config.broker).to_string(),
            read_block: config.broker.read_block(),
            channels: config.channels.clone(),
            slot: RunningSlot::new(),
        }
    }

    /// Set how long a read waits for new entries
    pub fn with_read_block(mut self, read_block: Duration) -> Self {
        self.read_block = read_block;
        self
    }

    pub fn role(&self) -> WorkerRole {
        self.role
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn slot(&self) -> &RunningSlot {
        &self.slot
    }

    /// Run until `shutdown` resolves or the broker fails. Both end in an
    /// error after teardown, shutdown with [`WorkerError::Interrupted`].
    ///
    /// A job in progress at shutdown is abandoned: its compute process is
    /// killed and its entry stays pending for the next start.
    pub async fn run<F>(&self, shutdown: F) -> WorkerResult<()>
    where
        F: Future<Output = ()>,
    {
        info!(
            role = %self.role,
            consumer = %self.consumer_name,
            stream = %self.stream,
            group = %self.group,
            "Starting worker"
        );

        let subscriptions = if self.role.subscribes_to_control() {
            self.subscribe().await?
        } else {
            Vec::new()
        };

        let mut consumer = self
            .broker
            .open_stream(&self.group, &self.consumer_name, &self.stream)
            .await?;

        let recovered = self.recover_pending(&mut consumer).await?;
        if recovered > 0 {
            info!(recovered, "Recovered pending entries");
        }

        tokio::pin!(shutdown);
        let result = loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(consumer = %self.consumer_name, "Shutdown requested");
                    break Err(WorkerError::Interrupted);
                }
                step = self.step(&mut consumer) => {
                    if let Err(e) = step {
                        error!(consumer = %self.consumer_name, error = %e, "Worker loop failed");
                        break Err(e);
                    }
                }
            }
        };

        self.slot.clear();
        for subscription in &subscriptions {
            subscription.stop();
        }
        info!(consumer = %self.consumer_name, "Worker stopped");
        result
    }

    /// Subscribe the control handler to every control channel
    pub async fn subscribe(&self) -> WorkerResult<Vec<Subscription>> {
        let handler = Arc::new(ControlHandler::new(
            self.slot.clone(),
            Arc::clone(self.engine.registry()),
            self.channels.clone(),
        ));

        let mut subscriptions = Vec::new();
        for channel in handler.channels() {
            subscriptions.push(self.broker.subscribe(channel, handler.clone()).await?);
            debug!(channel = %channel, "Subscribed to control channel");
        }
        Ok(subscriptions)
    }

    /// Fail and acknowledge every entry delivered to this consumer but never
    /// acknowledged. Each entry is handled once per call.
    pub async fn recover_pending(&self, consumer: &mut B::Consumer) -> WorkerResult<usize> {
        let count = consumer.count_pending().await?;
        if count == 0 {
            return Ok(0);
        }

        let entries = consumer.read_pending(count).await?;
        let recovered = entries.len();
        for entry in entries {
            self.handle_entry(consumer, entry, JobOrigin::Pending).await?;
        }
        Ok(recovered)
    }

    /// Read and process at most one new entry
    pub async fn step(&self, consumer: &mut B::Consumer) -> WorkerResult<Option<EntryOutcome>> {
        let entries = consumer.read_new(1, self.read_block).await?;
        let Some(entry) = entries.into_iter().next() else {
            return Ok(None);
        };
        self.handle_entry(consumer, entry, JobOrigin::New)
            .await
            .map(Some)
    }

    pub async fn handle_entry(
        &self,
        consumer: &mut B::Consumer,
        entry: StreamEntry,
        origin: JobOrigin,
    ) -> WorkerResult<EntryOutcome> {
        let message = match self.role.job_message(&entry) {
            Ok(message) => message,
            Err(e) => return self.drop_entry(consumer, &entry.id, &e.to_string()).await,
        };

        let job_id = message.peek_id();
        let (cancel, signal) = cancel_pair();
        if let Some(id) = &job_id {
            self.slot.set(id.clone(), cancel);
        }

        let span = JobLogContext::new(
            job_id.as_deref().unwrap_or("-"),
            message.kind,
            &self.consumer_name,
        )
        .span();
        let outcome = self
            .engine
            .process(&message, origin, signal, &self.backend)
            .instrument(span)
            .await;
        self.slot.clear();

        match outcome {
            JobOutcome::Completed { job_id, response } => {
                if !self.backend.send_update(message.kind, &job_id, &response).await {
                    warn!(
                        job_id = %job_id,
                        message_id = %message.message_id,
                        "Final update not stored, leaving entry unacknowledged"
                    );
                    return Ok(EntryOutcome::Withheld);
                }
                if !consumer.ack(&message.message_id).await? {
                    debug!(message_id = %message.message_id, "Entry was no longer pending");
                }
                Ok(EntryOutcome::Acked)
            }
            JobOutcome::Dropped { reason } => {
                self.drop_entry(consumer, &message.message_id, &reason)
                    .await
            }
        }
    }

    async fn drop_entry(
        &self,
        consumer: &mut B::Consumer,
        message_id: &str,
        reason: &str,
    ) -> WorkerResult<EntryOutcome> {
        warn!(message_id = %message_id, reason = %reason, "Dropping entry");
        consumer.ack(message_id).await?;

        let alert = json!({
            "type": "JobDropped",
            "stream": self.stream,
            "messageId": message_id,
            "reason": reason,
        })
        .to_string();
        match self
            .broker
            .publish_broadcast(&self.channels.alert, &alert)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(channel = %self.channels.alert, "No alert subscribers"),
            Err(e) => warn!(channel = %self.channels.alert, error = %e, "Unable to publish alert"),
        }
        Ok(EntryOutcome::Dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::Path;
    use tokio::sync::{mpsc, oneshot};
    use verity_backend::MemoryBackend;
    use verity_broker::{BroadcastHandler, MemoryBroker};
    use verity_core::JobKind;
    use verity_engine::{EngineSettings, ProcessSandbox, SchemaStore};
    use verity_plugin::Registry;

    fn engine(dir: &Path) -> Arc<Engine> {
        Arc::new(Engine::new(
            Arc::new(Registry::with_core_plugins()),
            SchemaStore::embedded().unwrap(),
            ProcessSandbox::new("/nonexistent/verity"),
            EngineSettings {
                log_dir: dir.join("logs"),
                error_dir: dir.join("errors"),
                plugin_root: None,
            },
        ))
    }

    struct Setup {
        broker: MemoryBroker,
        backend: MemoryBackend,
        config: VerityConfig,
        worker: Worker<MemoryBroker, MemoryBackend>,
    }

    fn setup(role: WorkerRole, dir: &Path) -> Setup {
        let broker = MemoryBroker::new();
        let backend = MemoryBackend::new();
        let config = VerityConfig::default();
        let worker = Worker::new(
            role,
            broker.clone(),
            backend.clone(),
            engine(dir),
            &config,
            1,
        )
        .with_read_block(Duration::from_millis(20));
        Setup {
            broker,
            backend,
            config,
            worker,
        }
    }

    impl Setup {
        async fn consumer(&self) -> <MemoryBroker as Broker>::Consumer {
            self.broker
                .open_stream(
                    &self.config.broker.consumer_group,
                    self.worker.consumer_name(),
                    self.worker.stream(),
                )
                .await
                .unwrap()
        }

        fn pending(&self) -> Vec<String> {
            self.broker
                .pending_ids(self.worker.stream(), &self.config.broker.consumer_group)
        }
    }

    struct Forward(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl BroadcastHandler for Forward {
        async fn on_message(&self, _channel: &str, payload: String) {
            let _ = self.0.send(payload);
        }
    }

    fn dataset(dir: &Path) -> String {
        let path = dir.join("data.json");
        std::fs::write(&path, r#"{"columns": ["age"], "rows": [[31], [45]]}"#).unwrap();
        path.display().to_string()
    }

    #[tokio::test]
    async fn test_pending_entries_are_failed_and_acked() {
        let dir = tempfile::tempdir().unwrap();
        let s = setup(WorkerRole::Task, dir.path());
        let mut consumer = s.consumer().await;

        s.broker
            .add_entry(s.worker.stream(), &[("task", r#"{"id":"t1"}"#)])
            .await
            .unwrap();
        // delivered, then the previous owner died
        consumer.read_new(1, Duration::from_millis(10)).await.unwrap();
        assert_eq!(s.pending().len(), 1);

        assert_eq!(s.worker.recover_pending(&mut consumer).await.unwrap(), 1);
        assert!(s.pending().is_empty());

        let update = s.backend.get_update(JobKind::Task, "t1").await.unwrap().unwrap();
        assert_eq!(update["status"], "Error");
        assert_eq!(update["taskProgress"], "100");
        assert!(update["errorMessages"].contains("recovered from pending backlog"));
    }

    #[tokio::test]
    async fn test_service_entry_is_acked_after_update() {
        let dir = tempfile::tempdir().unwrap();
        let s = setup(WorkerRole::Service, dir.path());
        let mut consumer = s.consumer().await;

        let payload = json!({"serviceId": "s1", "filePath": dataset(dir.path())}).to_string();
        s.broker
            .add_entry(s.worker.stream(), &[("validateDataset", payload.as_str())])
            .await
            .unwrap();

        let outcome = s.worker.step(&mut consumer).await.unwrap();
        assert_eq!(outcome, Some(EntryOutcome::Acked));
        assert!(s.pending().is_empty());

        let update = s
            .backend
            .get_update(JobKind::ValidateDataset, "s1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update["status"], "done");
        assert_eq!(update["validationResult"], "valid");
        assert_eq!(update["dataFormat"], "tabular");

        assert_eq!(s.worker.step(&mut consumer).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ack_withheld_when_update_fails() {
        let dir = tempfile::tempdir().unwrap();
        let s = setup(WorkerRole::Service, dir.path());
        let mut consumer = s.consumer().await;

        let payload = json!({"serviceId": "s2", "filePath": dataset(dir.path())}).to_string();
        let id = s
            .broker
            .add_entry(s.worker.stream(), &[("validateDataset", payload.as_str())])
            .await
            .unwrap();

        s.backend.set_available(false);
        let outcome = s.worker.step(&mut consumer).await.unwrap();
        assert_eq!(outcome, Some(EntryOutcome::Withheld));
        assert_eq!(s.pending(), vec![id]);
        assert!(s.worker.slot().current().is_none());
    }

    #[tokio::test]
    async fn test_unreportable_entries_are_dropped_with_alert() {
        let dir = tempfile::tempdir().unwrap();
        let s = setup(WorkerRole::Task, dir.path());
        let mut consumer = s.consumer().await;

        let (tx, mut alerts) = mpsc::unbounded_channel();
        let _subscription = s
            .broker
            .subscribe(&s.config.channels.alert, Arc::new(Forward(tx)))
            .await
            .unwrap();

        let id = s
            .broker
            .add_entry(s.worker.stream(), &[("task", r#"{"mode":"upload"}"#)])
            .await
            .unwrap();
        s.broker
            .add_entry(s.worker.stream(), &[("unexpected", "{}")])
            .await
            .unwrap();

        for _ in 0..2 {
            let outcome = s.worker.step(&mut consumer).await.unwrap();
            assert_eq!(outcome, Some(EntryOutcome::Dropped));
        }
        assert!(s.pending().is_empty());

        let alert: serde_json::Value =
            serde_json::from_str(&alerts.recv().await.unwrap()).unwrap();
        assert_eq!(alert["type"], "JobDropped");
        assert_eq!(alert["messageId"], id);
        assert_eq!(alert["stream"], s.worker.stream());
        assert!(alerts.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let s = setup(WorkerRole::Task, dir.path());
        let (stop, stopped) = oneshot::channel::<()>();

        let drive = async {
            s.broker
                .add_entry(s.worker.stream(), &[("task", r#"{"id":"t9"}"#)])
                .await
                .unwrap();
            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            while s.backend.get_update(JobKind::Task, "t9").await.unwrap().is_none()
                || !s.pending().is_empty()
            {
                assert!(tokio::time::Instant::now() < deadline, "job was not processed");
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
            let _ = stop.send(());
        };
        let run = s.worker.run(async {
            let _ = stopped.await;
        });

        let (result, ()) = tokio::join!(run, drive);
        assert!(matches!(result, Err(WorkerError::Interrupted)));
        assert!(s.worker.slot().current().is_none());

        let update = s.backend.get_update(JobKind::Task, "t9").await.unwrap().unwrap();
        assert_eq!(update["status"], "Error");
        assert!(update["errorMessages"].contains("ARG"));
    }

    #[tokio::test]
    async fn test_broker_failure_stops_worker() {
        let dir = tempfile::tempdir().unwrap();
        let s = setup(WorkerRole::Service, dir.path());
        s.broker.set_unavailable(true);

        let result = s.worker.run(std::future::pending()).await;
        assert!(matches!(result, Err(WorkerError::Broker(_))));
    }
}
