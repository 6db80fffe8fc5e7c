//! Settings - 起動時に一度だけ読む設定
//!
//! Merge order (later overrides earlier):
//! 1. compiled defaults
//! 2. TOML file (`easel.toml` or an explicit path)
//! 3. `EASEL_*` environment variables, `__` separating nested keys
//!    (e.g. `EASEL_QUEUE__VISIBILITY_TIMEOUT_SECS=60`)

use std::path::Path;
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::app::worker::caption_for;

pub const DEFAULT_MODEL_ID: &str = "stability.stable-diffusion-xl-v1";
pub const DEFAULT_CONFIG_FILE: &str = "easel.toml";
const ENV_PREFIX: &str = "EASEL_";
const MAX_BATCH_SIZE: usize = 10;
/// Per-message allowance for the store and upload steps on top of inference.
pub const STEP_HEADROOM: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid settings: {0}")]
    Invalid(String),
}

fn deserialize_option_secret<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<SecretString>, D::Error> {
    Ok(Option::<String>::deserialize(d)?
        .filter(|s| !s.is_empty())
        .map(SecretString::from))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    /// Durable, survives restarts.
    Sqlite,
    /// Process memory only. Pending work is lost on exit.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub backend: QueueBackend,
    /// Database file for the sqlite backend.
    pub path: String,
    /// Logical queue name; several queues may share one database.
    pub name: String,
    pub visibility_timeout_secs: u64,
    pub wait_secs: u64,
    pub batch_size: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Sqlite,
            path: "./easel-queue.db".into(),
            name: "easel-requests".into(),
            visibility_timeout_secs: 30,
            wait_secs: 2,
            batch_size: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Empty means `easel-image-bucket-{stage}`.
    pub bucket: String,
    /// Root directory for the local artifact store.
    pub root: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            root: "./artifacts".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceSettings {
    pub endpoint: String,
    pub model_id: String,
    pub timeout_secs: u64,
    /// Empty means `Generated image from {model_id}`.
    pub caption: String,
    #[serde(skip_serializing, deserialize_with = "deserialize_option_secret")]
    pub api_key: Option<SecretString>,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/generate".into(),
            model_id: DEFAULT_MODEL_ID.into(),
            timeout_secs: 25,
            caption: String::new(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SlackSettings {
    pub api_base: String,
    #[serde(skip_serializing, deserialize_with = "deserialize_option_secret")]
    pub bot_token: Option<SecretString>,
}

impl Default for SlackSettings {
    fn default() -> Self {
        Self {
            api_base: crate::impls::slack::DEFAULT_API_BASE.into(),
            bot_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub count: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self { count: 1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub stage: String,
    pub queue: QueueSettings,
    pub storage: StorageSettings,
    pub inference: InferenceSettings,
    pub slack: SlackSettings,
    pub server: ServerSettings,
    pub workers: WorkerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            stage: "dev".into(),
            queue: QueueSettings::default(),
            storage: StorageSettings::default(),
            inference: InferenceSettings::default(),
            slack: SlackSettings::default(),
            server: ServerSettings::default(),
            workers: WorkerSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults → `easel.toml` (or `path`) → environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = path.unwrap_or(Path::new(DEFAULT_CONFIG_FILE));
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Settings::default()))
                .merge(Toml::file(file))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Defaults → TOML string. No environment.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Settings::default()))
                .merge(Toml::string(toml)),
        )
    }

    fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let settings: Settings = figment.extract().map_err(Box::new)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inference.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "inference.timeout_secs must be positive".into(),
            ));
        }
        if !(1..=MAX_BATCH_SIZE).contains(&self.queue.batch_size) {
            return Err(ConfigError::Invalid(format!(
                "queue.batch_size must be within 1..={MAX_BATCH_SIZE}"
            )));
        }
        // 1 回の receive で借りた message は全部同じ visibility window を共有する。
        // 最後の 1 件が終わる前に window が切れると再配送が起きる
        let batch = self.queue.batch_size as u32;
        let needed = (self.inference_timeout() + STEP_HEADROOM) * batch;
        if needed >= self.visibility_timeout() {
            return Err(ConfigError::Invalid(format!(
                "queue.visibility_timeout_secs ({}) must exceed queue.batch_size ({}) x \
                 (inference.timeout_secs ({}) + {}s headroom)",
                self.queue.visibility_timeout_secs,
                self.queue.batch_size,
                self.inference.timeout_secs,
                STEP_HEADROOM.as_secs(),
            )));
        }
        if self.workers.count == 0 {
            return Err(ConfigError::Invalid("workers.count must be positive".into()));
        }
        if self.inference.model_id.trim().is_empty() {
            return Err(ConfigError::Invalid("inference.model_id is empty".into()));
        }
        Ok(())
    }

    pub fn caption(&self) -> String {
        if self.inference.caption.is_empty() {
            caption_for(&self.inference.model_id)
        } else {
            self.inference.caption.clone()
        }
    }

    pub fn bucket(&self) -> String {
        if self.storage.bucket.is_empty() {
            format!("easel-image-bucket-{}", self.stage)
        } else {
            self.storage.bucket.clone()
        }
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.queue.visibility_timeout_secs)
    }

    pub fn inference_timeout(&self) -> Duration {
        Duration::from_secs(self.inference.timeout_secs)
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_secs(self.queue.wait_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn defaults_are_valid() {
        let s = Settings::from_toml_str("").unwrap();
        assert_eq!(s.stage, "dev");
        assert_eq!(s.inference.model_id, DEFAULT_MODEL_ID);
        assert_eq!(s.bucket(), "easel-image-bucket-dev");
        assert!(s.inference_timeout() < s.visibility_timeout());
        assert!(s.slack.bot_token.is_none());
        assert_eq!(s.queue.backend, QueueBackend::Sqlite);
    }

    #[test]
    fn caption_defaults_to_model_id() {
        let s = Settings::from_toml_str("").unwrap();
        assert_eq!(s.caption(), format!("Generated image from {DEFAULT_MODEL_ID}"));

        let s = Settings::from_toml_str("[inference]\ncaption = \"made by easel\"").unwrap();
        assert_eq!(s.caption(), "made by easel");
    }

    #[test]
    fn toml_overrides_defaults() {
        let s = Settings::from_toml_str(
            r#"
            stage = "prod"

            [queue]
            backend = "memory"
            visibility_timeout_secs = 400
            batch_size = 5

            [inference]
            timeout_secs = 60
            api_key = "k-123"

            [slack]
            bot_token = "xoxb-1"
            "#,
        )
        .unwrap();
        assert_eq!(s.bucket(), "easel-image-bucket-prod");
        assert_eq!(s.queue.batch_size, 5);
        assert_eq!(s.queue.backend, QueueBackend::Memory);
        assert_eq!(s.inference.timeout_secs, 60);
        assert_eq!(s.inference.api_key.unwrap().expose_secret(), "k-123");
        assert_eq!(s.slack.bot_token.unwrap().expose_secret(), "xoxb-1");
    }

    #[test]
    fn explicit_bucket_wins() {
        let s = Settings::from_toml_str("[storage]\nbucket = \"my-bucket\"").unwrap();
        assert_eq!(s.bucket(), "my-bucket");
    }

    #[test]
    fn inference_timeout_must_fit_visibility_window() {
        let err = with_window(20, 1, 20).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("visibility")));
    }

    fn with_window(visibility: u64, batch: usize, timeout: u64) -> Result<Settings, ConfigError> {
        Settings::from_toml_str(&format!(
            "[queue]\nvisibility_timeout_secs = {visibility}\nbatch_size = {batch}\n\
             [inference]\ntimeout_secs = {timeout}"
        ))
    }

    #[test]
    fn whole_batch_must_fit_one_visibility_window() {
        // 1 件なら 20 + 2 < 30 で通るが、2 件目は window 切れで再配送される
        assert!(with_window(30, 1, 20).is_ok());
        let err = with_window(30, 2, 20).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("batch_size")));
        assert!(with_window(45, 2, 20).is_ok());
    }

    #[test]
    fn batch_size_is_bounded() {
        assert!(Settings::from_toml_str("[queue]\nbatch_size = 0").is_err());
        assert!(Settings::from_toml_str("[queue]\nbatch_size = 11").is_err());
    }

    #[test]
    fn zero_workers_rejected() {
        assert!(Settings::from_toml_str("[workers]\ncount = 0").is_err());
    }

    #[test]
    fn secrets_are_not_serialized() {
        let s = Settings::from_toml_str("[slack]\nbot_token = \"xoxb-secret\"").unwrap();
        let json = serde_json::to_string(&s).unwrap();
        assert!(!json.contains("xoxb-secret"));
        assert!(!json.contains("bot_token"));
    }

    #[test]
    fn bad_type_is_a_load_error() {
        let err = Settings::from_toml_str("[queue]\nbatch_size = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }
}
