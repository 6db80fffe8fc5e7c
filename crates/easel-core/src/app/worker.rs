//! FulfillmentWorker - 1 件の delivery attempt を最後まで実行する
//!
//! # フロー
//! 1. Parsing: message body → GenerationRequest
//! 2. Generating: InferenceGateway（timeout 付き）
//! 3. Storing: ArtifactStore に `{channel}/{date}/{time}.png`
//! 4. Notifying: 同じ bytes を会話にファイルとして投稿
//! 5. finalize → Done
//!
//! # 補償ポリシー
//! どの step で失敗しても attempt は必ず finalize する（再配送させない）。
//! 失敗時に有料の推論呼び出しや二重投稿を繰り返さないための方針で、
//! 回復はユーザーの新しい mention に任せる。
//! 会話 id が取れていれば失敗通知を 1 回だけ試みる（best-effort、失敗はログのみ）。

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{Instrument, error, info, info_span, warn};

use crate::domain::{
    AttemptReport, AttemptState, FailureNotice, FulfillmentError, GeneratedArtifact,
    GenerationRequest,
};
use crate::ports::{
    ArtifactStore, Clock, Delivery, DispatchQueue, FileUpload, InferenceError, InferenceGateway,
    NotificationChannel, QueueError,
};

/// Comment posted with the generated image.
pub fn caption_for(model_id: &str) -> String {
    format!("Generated image from {model_id}")
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Artifact Store bucket/container.
    pub bucket: String,
    /// Upper bound on one inference call. Keep it below the queue's
    /// visibility timeout.
    pub inference_timeout: Duration,
    pub caption: String,
    /// Queue visibility timeout. When set, a batch member whose lease would
    /// run out before inference finishes is left for redelivery instead of
    /// being started.
    pub visibility_timeout: Option<Duration>,
}

impl WorkerConfig {
    pub fn new(bucket: impl Into<String>, inference_timeout: Duration) -> Self {
        Self {
            bucket: bucket.into(),
            inference_timeout,
            caption: caption_for(crate::config::DEFAULT_MODEL_ID),
            visibility_timeout: None,
        }
    }

    pub fn with_caption(mut self, caption: impl Into<String>) -> Self {
        self.caption = caption.into();
        self
    }

    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = Some(visibility_timeout);
        self
    }
}

pub struct FulfillmentWorker {
    queue: Arc<dyn DispatchQueue>,
    inference: Arc<dyn InferenceGateway>,
    store: Arc<dyn ArtifactStore>,
    notifier: Arc<dyn NotificationChannel>,
    clock: Arc<dyn Clock>,
    config: WorkerConfig,
}

impl FulfillmentWorker {
    pub fn new(
        queue: Arc<dyn DispatchQueue>,
        inference: Arc<dyn InferenceGateway>,
        store: Arc<dyn ArtifactStore>,
        notifier: Arc<dyn NotificationChannel>,
        clock: Arc<dyn Clock>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            inference,
            store,
            notifier,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Receive up to `max` deliveries without processing them.
    pub async fn receive(&self, max: usize, wait: Duration) -> Result<Vec<Delivery>, QueueError> {
        self.queue.receive(max, wait).await
    }

    /// Receive up to `max` messages and process them one after another.
    pub async fn poll_once(
        &self,
        max: usize,
        wait: Duration,
    ) -> Result<Vec<AttemptReport>, QueueError> {
        let deliveries = self.receive(max, wait).await?;
        Ok(self.process_batch(&deliveries, Instant::now()).await)
    }

    /// Process deliveries received together at `received_at`, in order.
    ///
    /// They share one visibility window. Once the remaining lease is shorter
    /// than the inference timeout, the rest are not started; they become
    /// visible again and go to whichever worker receives them next.
    pub async fn process_batch(
        &self,
        deliveries: &[Delivery],
        received_at: Instant,
    ) -> Vec<AttemptReport> {
        let mut reports = Vec::with_capacity(deliveries.len());
        for (i, delivery) in deliveries.iter().enumerate() {
            if self.lease_too_short(received_at) {
                info!(
                    skipped = deliveries.len() - i,
                    message_id = %delivery.message_id,
                    "visibility window nearly spent, leaving rest of batch for redelivery"
                );
                break;
            }
            reports.push(self.process(delivery).await);
        }
        reports
    }

    fn lease_too_short(&self, received_at: Instant) -> bool {
        let Some(visibility) = self.config.visibility_timeout else {
            return false;
        };
        received_at.elapsed() + self.config.inference_timeout >= visibility
    }

    /// Run one delivery attempt to a terminal state. Never returns an error:
    /// every failure is compensated here.
    pub async fn process(&self, delivery: &Delivery) -> AttemptReport {
        let span = info_span!(
            "attempt",
            message_id = %delivery.message_id,
            receive_count = delivery.receive_count,
        );
        self.process_inner(delivery).instrument(span).await
    }

    async fn process_inner(&self, delivery: &Delivery) -> AttemptReport {
        let mut report = AttemptReport::received(&delivery.message_id, delivery.receive_count);
        if delivery.receive_count > 1 {
            // visibility timeout 超過による再配送。重複した副作用は既知の制約
            warn!("message redelivered, another worker may have processed it already");
        }

        match self.run_pipeline(delivery, &mut report).await {
            Ok(()) => {
                self.finalize(delivery, &mut report).await;
                report.advance(AttemptState::Done);
                info!(key = ?report.key, "attempt done");
            }
            Err(err) => self.compensate(delivery, &mut report, err).await,
        }
        report
    }

    async fn run_pipeline(
        &self,
        delivery: &Delivery,
        report: &mut AttemptReport,
    ) -> Result<(), FulfillmentError> {
        report.advance(AttemptState::Parsing);
        let request = GenerationRequest::decode(&delivery.body)?;
        report.conversation_id = Some(request.conversation_id().to_string());

        report.advance(AttemptState::Generating);
        let bytes = self.generate(request.prompt()).await?;
        let artifact =
            GeneratedArtifact::png(bytes, request.conversation_id(), self.clock.now());
        report.key = Some(artifact.key.clone());

        report.advance(AttemptState::Storing);
        self.store
            .put(
                &self.config.bucket,
                artifact.key.as_str(),
                &artifact.bytes,
                artifact.content_type,
            )
            .await?;

        report.advance(AttemptState::Notifying);
        let title = format!("Input text: {}", request.prompt());
        self.notifier
            .upload_file(FileUpload {
                conversation_id: request.conversation_id(),
                bytes: &artifact.bytes,
                filename: &artifact.filename,
                title: &title,
                caption: &self.config.caption,
            })
            .await?;
        Ok(())
    }

    async fn generate(&self, prompt: &str) -> Result<Vec<u8>, InferenceError> {
        let timeout = self.config.inference_timeout;
        let bytes = tokio::time::timeout(timeout, self.inference.generate(prompt))
            .await
            .map_err(|_| InferenceError::Timeout(timeout))??;
        if bytes.is_empty() {
            return Err(InferenceError::EmptyBody);
        }
        Ok(bytes)
    }

    async fn compensate(
        &self,
        delivery: &Delivery,
        report: &mut AttemptReport,
        err: FulfillmentError,
    ) {
        let failed_in = report.state;
        report.advance(AttemptState::Compensating);
        report.error = Some(err.to_string());
        error!(
            state = %failed_in,
            kind = ?err.kind(),
            channel_id = ?report.conversation_id,
            body = %delivery.body,
            error = %err,
            "attempt failed"
        );

        // (a) どの step で失敗しても finalize
        self.finalize(delivery, report).await;

        // (b) 会話 id が分かっている場合だけ通知（InvalidInput では通知しない）
        if let Some(conversation_id) = report.conversation_id.clone() {
            let text = format!("Error occurred: {err}");
            report.failure_notice = match self.notifier.post_message(&conversation_id, &text).await
            {
                Ok(()) => FailureNotice::Delivered,
                Err(notify_err) => {
                    error!(
                        channel_id = %conversation_id,
                        error = %notify_err,
                        "failure notice could not be posted"
                    );
                    FailureNotice::Failed(notify_err.to_string())
                }
            };
        }

        report.advance(err.terminal_state());
    }

    async fn finalize(&self, delivery: &Delivery, report: &mut AttemptReport) {
        match self.queue.finalize(&delivery.receipt).await {
            Ok(()) => report.finalized = true,
            Err(e) => {
                error!(receipt = %delivery.receipt, error = %e, "finalize failed");
            }
        }
    }
}
