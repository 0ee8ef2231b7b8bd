use crate::{ApnProfile, ApnType, Result, RetryPolicy};
use config::{Config, Environment, File, FileFormat};
use serde::{de, Deserialize, Deserializer};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

const DEFAULT_SETTINGS: &str = include_str!("../config/default.toml");

/// Settings are all the configuration parameters the tracker needs to operate.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    /// Log settings
    pub log: LogSettings,
    /// Tracker wide gating settings
    pub tracker: TrackerSettings,
    /// Retry policy for failed setups
    pub retry: RetrySettings,
    /// Voice call interaction
    pub voice: VoiceSettings,
    /// Roaming policy
    pub roaming: RoamingSettings,
    /// Apn types and profiles
    pub apn: ApnSettings,
    /// Dedicated bearer settings
    pub bearer: BearerSettings,
    /// Simulated radio used by the server command
    pub simulator: SimulatorSettings,
}

/// The method to use for logging.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub enum LogMethod {
    /// Display logging information on stdout
    Stdio,
    /// Write logging information to a daily rolling file
    File,
}

/// Settings for log method and level to be used by the running service.
#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    /// Log filter directive, for example "info" or "dct_rs::fsm=debug"
    /// (default info)
    pub level: String,
    /// Which log method to use (stdio or file, default stdio)
    #[serde(deserialize_with = "deserialize_log_method")]
    pub method: LogMethod,
    /// Directory for the file log method
    pub path: PathBuf,
    /// Whether to show timestamps in the output stream (default false)
    pub timestamp: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrackerSettings {
    /// Hold off setup until subscriber records are loaded (default true)
    pub require_records: bool,
    /// Apn types enabled at startup without an explicit request
    /// (default ["default"])
    pub auto_enable_types: Vec<ApnType>,
    /// Capacity of the event bus
    pub queue_size: usize,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicyKind {
    Exponential,
    Table,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    /// Which policy to use (exponential or table, default exponential)
    #[serde(deserialize_with = "deserialize_retry_policy")]
    pub policy: RetryPolicyKind,
    /// Retries before giving up, exponential policy only (default 8)
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds (default 5000)
    pub min_wait_ms: u64,
    /// Upper bound on retry delays in milliseconds (default 1800000)
    pub max_wait_ms: u64,
    /// Retry table for the table policy, for example
    /// "max_retries=5, 5000, 10000:2000, 20000"
    pub table: String,
}

/// Which wins when a voice call would suspend a context that carries
/// dedicated bearers.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum BearerPrecedence {
    /// Contexts with live or pending dedicated bearers keep running
    Bearer,
    /// The voice call suspends every context, dropping its bearers
    Voice,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VoiceSettings {
    /// Whether voice and data can run at the same time (default false)
    pub concurrent_voice_data: bool,
    /// Whether a voice call on the peer subscription suspends data
    /// (default true)
    pub suspend_on_peer_call: bool,
    /// Precedence between voice suspension and dedicated bearers
    /// (bearer or voice, default bearer)
    #[serde(deserialize_with = "deserialize_bearer_precedence")]
    pub bearer_precedence: BearerPrecedence,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RoamingSettings {
    /// The user's data roaming setting at startup (default false)
    pub data_roaming_enabled: bool,
    /// Apn types allowed while roaming regardless of the data roaming setting
    pub exempt_types: Vec<ApnType>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApnSettings {
    /// Carrier specific apn types to register next to the built in ones
    pub extra_types: Vec<ApnType>,
    /// Apn types not affected by the user data switch
    pub user_data_exempt_types: Vec<ApnType>,
    /// Configured profiles in priority order
    pub profiles: Vec<ApnProfile>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BearerSettings {
    /// How long an abort may wait for network confirmation in seconds
    /// (default 10)
    pub abort_timeout_secs: u64,
}

impl BearerSettings {
    pub fn abort_timeout(&self) -> Duration {
        Duration::from_secs(self.abort_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SimulatorSettings {
    /// Response latency of the simulated radio in milliseconds (default 200)
    pub latency_ms: u64,
    /// Apn names the simulated network rejects permanently
    pub reject_apns: Vec<String>,
}

impl SimulatorSettings {
    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

impl Settings {
    /// Load Settings from a given path. Settings are loaded from the built in
    /// defaults, then merged with the given file, followed by environment
    /// overrides.
    ///
    /// Environment overrides have the same name as the entries in the settings
    /// file in uppercase, prefixed with "DCT_" and with "__" separating
    /// sections. For example "DCT_LOG__LEVEL" overrides the log level.
    pub fn new(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_SETTINGS, FileFormat::Toml));
        if let Some(path) = path {
            builder = builder.add_source(File::from(path.to_path_buf()));
        }
        builder
            .add_source(
                Environment::with_prefix("DCT")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(|e| e.into())
    }

    pub fn retry_policy(&self) -> Result<RetryPolicy> {
        RetryPolicy::try_from(&self.retry)
    }
}

fn deserialize_log_method<'de, D>(d: D) -> std::result::Result<LogMethod, D::Error>
where
    D: Deserializer<'de>,
{
    let method = match String::deserialize(d)?.to_lowercase().as_str() {
        "stdio" => LogMethod::Stdio,
        "file" => LogMethod::File,
        unsupported => {
            return Err(de::Error::custom(format!(
                "unsupported log method: \"{unsupported}\""
            )))
        }
    };
    Ok(method)
}

fn deserialize_retry_policy<'de, D>(d: D) -> std::result::Result<RetryPolicyKind, D::Error>
where
    D: Deserializer<'de>,
{
    let policy = match String::deserialize(d)?.to_lowercase().as_str() {
        "exponential" | "" => RetryPolicyKind::Exponential,
        "table" => RetryPolicyKind::Table,
        unsupported => {
            return Err(de::Error::custom(format!(
                "unsupported retry policy: \"{unsupported}\""
            )))
        }
    };
    Ok(policy)
}

fn deserialize_bearer_precedence<'de, D>(d: D) -> std::result::Result<BearerPrecedence, D::Error>
where
    D: Deserializer<'de>,
{
    let precedence = match String::deserialize(d)?.to_lowercase().as_str() {
        "bearer" | "" => BearerPrecedence::Bearer,
        "voice" => BearerPrecedence::Voice,
        unsupported => {
            return Err(de::Error::custom(format!(
                "unsupported bearer precedence: \"{unsupported}\""
            )))
        }
    };
    Ok(precedence)
}
