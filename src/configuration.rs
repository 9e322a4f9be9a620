use secrecy::Secret;
use serde_aux::field_attributes::deserialize_number_from_string;
use std::time::Duration;

#[derive(serde::Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub engine: EngineSettings,
    /// One entry per named `Transport` the engine should wire up at startup
    /// (spec.md §4.2 — "multiple named transports may coexist").
    pub transports: Vec<TransportSettings>,
}

#[derive(serde::Deserialize, Clone)]
pub struct ApplicationSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub base_url: String,
}

/// Mirrors spec.md §6's configuration table (`manager.Config` in the
/// original Go source) one field at a time, with the same defaulting rules
/// applied in `EngineSettings::with_defaults`.
#[derive(serde::Deserialize, Clone)]
pub struct EngineSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub batch_size: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub concurrency: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_send_errors: usize,

    pub sliding_window_enabled: bool,
    pub sliding_window_duration_secs: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub sliding_window_rate: usize,

    pub unsub_header: bool,
    pub individual_tracking: bool,

    pub unsub_url: String,
    pub optin_url: String,
    pub link_track_url: String,
    pub view_track_url: String,
    pub message_url: String,

    /// Fixed-interval tick for `Scheduler::run` (spec.md §4.3 default: 5s).
    pub scheduler_tick_secs: u64,
}

impl EngineSettings {
    /// Applies spec.md §6's default table to fields that were left at zero
    /// (BatchSize -> 1000, Concurrency -> 1; sliding window and error budget
    /// are legitimately zero/disabled by default, unlike the other two).
    pub fn with_defaults(mut self) -> Self {
        if self.batch_size == 0 {
            self.batch_size = 1000;
        }
        if self.concurrency == 0 {
            self.concurrency = 1;
        }
        self
    }

    pub fn sliding_window_duration(&self) -> Duration {
        Duration::from_secs(self.sliding_window_duration_secs)
    }

    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_secs(self.scheduler_tick_secs)
    }
}

#[derive(serde::Deserialize, Clone)]
pub struct TransportSettings {
    pub name: String,
    pub kind: TransportKind,
    pub base_url: String,
    pub auth_token: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_ms: u64,
}

#[derive(serde::Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    PostmarkHttp,
    Webhook,
}

pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir().expect("Failed to determine the current directory");
    let configuration_directory = base_path.join("configuration");

    // Detect the running environment, defaulting to `local`.
    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .expect("Failed to parse APP_ENVIRONMENT.");
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(configuration_directory.join("base.yaml")))
        .add_source(config::File::from(
            configuration_directory.join(environment_filename),
        ))
        // Add in settings from environment variables (with a prefix of APP and
        // '__' as separator) e.g. `APP_ENGINE__CONCURRENCY=4 would set
        // `Settings.engine.concurrency`.
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>().map(|s| Settings {
        engine: s.engine.with_defaults(),
        ..s
    })
}
