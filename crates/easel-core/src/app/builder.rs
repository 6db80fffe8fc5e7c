//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! receiver と worker が使う外部 client はすべてここで注入する。
//! 足りないものがあれば build() で一度にまとめて報告する（Fail-fast）。

use std::sync::Arc;

use super::dispatch::EventDispatchTable;
use super::receiver::EventReceiver;
use super::server::ServerState;
use super::worker::{FulfillmentWorker, WorkerConfig};
use super::worker_loop::{PollSettings, WorkerGroup};
use crate::config::{QueueBackend, Settings};
use crate::impls::{
    HttpInferenceGateway, InMemoryDispatchQueue, LocalArtifactStore, SlackNotifier,
    SqliteDispatchQueue,
};
use crate::ports::{
    ArtifactStore, Clock, DispatchQueue, InferenceError, InferenceGateway, NotificationChannel,
    QueueError, SystemClock,
};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .queue(queue)
///     .inference(gateway)
///     .store(store)
///     .notifier(slack)
///     .worker_config(WorkerConfig::new("bucket", Duration::from_secs(25)))
///     .build()?;
/// ```
#[derive(Default)]
pub struct AppBuilder {
    queue: Option<Arc<dyn DispatchQueue>>,
    inference: Option<Arc<dyn InferenceGateway>>,
    store: Option<Arc<dyn ArtifactStore>>,
    notifier: Option<Arc<dyn NotificationChannel>>,
    clock: Option<Arc<dyn Clock>>,
    worker_config: Option<WorkerConfig>,
    poll: PollSettings,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing dependencies: {0:?}. These must be supplied before build().")]
    Missing(Vec<&'static str>),

    #[error("failed to create inference client: {0}")]
    Inference(#[from] InferenceError),

    #[error("failed to open dispatch queue: {0}")]
    Queue(#[from] QueueError),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wire the production adapters from loaded settings.
    ///
    /// With the sqlite backend the queue lives on disk, so pending requests
    /// outlive the process. The memory backend only works when the receiver
    /// and workers share one `App`.
    pub async fn from_settings(settings: &Settings) -> Result<Self, BuildError> {
        let Some(bot_token) = settings.slack.bot_token.clone() else {
            return Err(BuildError::Missing(vec!["slack.bot_token"]));
        };

        let inference = HttpInferenceGateway::new(
            settings.inference.endpoint.as_str(),
            settings.inference.model_id.as_str(),
            settings.inference.api_key.clone(),
            settings.inference_timeout(),
        )?;
        let worker_config = WorkerConfig::new(settings.bucket(), settings.inference_timeout())
            .with_caption(settings.caption())
            .with_visibility_timeout(settings.visibility_timeout());

        let queue: Arc<dyn DispatchQueue> = match settings.queue.backend {
            QueueBackend::Sqlite => Arc::new(
                SqliteDispatchQueue::open(
                    &settings.queue.path,
                    settings.queue.name.as_str(),
                    settings.visibility_timeout(),
                )
                .await?,
            ),
            QueueBackend::Memory => {
                Arc::new(InMemoryDispatchQueue::new(settings.visibility_timeout()))
            }
        };

        Ok(Self::new()
            .queue(queue)
            .inference(Arc::new(inference))
            .store(Arc::new(LocalArtifactStore::new(settings.storage.root.as_str())))
            .notifier(Arc::new(SlackNotifier::with_api_base(
                bot_token,
                settings.slack.api_base.as_str(),
            )))
            .worker_config(worker_config)
            .poll(PollSettings {
                batch_size: settings.queue.batch_size,
                wait: settings.receive_wait(),
            }))
    }

    pub fn queue(mut self, queue: Arc<dyn DispatchQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn inference(mut self, inference: Arc<dyn InferenceGateway>) -> Self {
        self.inference = Some(inference);
        self
    }

    pub fn store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn NotificationChannel>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn worker_config(mut self, config: WorkerConfig) -> Self {
        self.worker_config = Some(config);
        self
    }

    pub fn poll(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// # 検証
    /// - queue / inference / store / notifier / worker_config が全て揃っているか
    /// - 不足があれば BuildError::Missing に全部並べて返す
    pub fn build(self) -> Result<App, BuildError> {
        let mut missing = Vec::new();
        if self.queue.is_none() {
            missing.push("queue");
        }
        if self.inference.is_none() {
            missing.push("inference");
        }
        if self.store.is_none() {
            missing.push("store");
        }
        if self.notifier.is_none() {
            missing.push("notifier");
        }
        if self.worker_config.is_none() {
            missing.push("worker_config");
        }

        let (Some(queue), Some(inference), Some(store), Some(notifier), Some(config)) = (
            self.queue,
            self.inference,
            self.store,
            self.notifier,
            self.worker_config,
        ) else {
            return Err(BuildError::Missing(missing));
        };
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        let receiver = Arc::new(EventReceiver::new(queue.clone()));
        let table = Arc::new(EventDispatchTable::with_mentions(receiver.clone()));
        let worker = Arc::new(FulfillmentWorker::new(
            queue.clone(),
            inference,
            store,
            notifier,
            clock,
            config,
        ));

        Ok(App {
            queue,
            receiver,
            table,
            worker,
            poll: self.poll,
        })
    }
}

/// App は receiver 側と worker 側が同じ queue を共有する組み立て済みの一式
pub struct App {
    pub queue: Arc<dyn DispatchQueue>,
    pub receiver: Arc<EventReceiver>,
    pub table: Arc<EventDispatchTable>,
    pub worker: Arc<FulfillmentWorker>,
    pub poll: PollSettings,
}

impl App {
    pub fn server_state(&self) -> ServerState {
        ServerState {
            table: self.table.clone(),
            queue: self.queue.clone(),
        }
    }

    pub fn spawn_workers(&self, n: usize) -> WorkerGroup {
        WorkerGroup::spawn(n, self.worker.clone(), self.poll)
    }
}
