//! Configuration management for Lambda functions.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::queue::ClaimOrder;
use crate::{Error, Result};

/// How the trigger continues dispatch after acknowledging its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Detach a Tokio task in this process.
    Spawn,
    /// Re-invoke this Lambda function asynchronously with the claimed items.
    SelfInvoke,
    /// Dispatch before responding.
    Inline,
}

impl FromStr for DispatchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "spawn" => Ok(Self::Spawn),
            "self_invoke" | "self-invoke" => Ok(Self::SelfInvoke),
            "inline" | "sync" => Ok(Self::Inline),
            other => Err(Error::Config(format!("unknown dispatch mode: {}", other))),
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database host
    pub db_host: String,
    /// Database name
    pub db_name: String,
    /// ARN of the secret containing database credentials
    pub db_secret_arn: String,
    /// AWS region
    pub aws_region: String,
    /// Maximum items claimed per trigger invocation
    pub batch_size: usize,
    /// Maximum concurrent worker calls
    pub concurrency: usize,
    /// Ordering policy for the claim
    pub claim_order: ClaimOrder,
    /// Estimated wall-clock minutes per dispatched chunk
    pub minutes_per_chunk: u32,
    /// Per-item worker budget
    pub worker_timeout: Option<Duration>,
    /// Age after which a `processing` item is considered orphaned
    pub orphan_timeout: Duration,
    pub dispatch_mode: DispatchMode,
    /// This function's own name, used for self-invocation
    pub function_name: String,
    /// Object storage bucket for generated audio
    pub audio_bucket: String,
    /// Base URL of the object storage REST API
    pub storage_api_url: String,
    /// ARN of the secret holding the storage API key
    pub storage_key_secret_arn: String,
    pub bedrock_model_id: String,
    pub default_voice: String,
    pub audio_expiration_hours: i64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| Error::Config(format!("{} not set", key)))
        };
        let or_default =
            |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let worker_timeout_secs: u64 = parse(&lookup, "WORKER_TIMEOUT_SECS", 240)?;

        let config = Self {
            db_host: required("DATABASE_HOST")?,
            db_name: or_default("DATABASE_NAME", "wake_audio"),
            db_secret_arn: required("DATABASE_URL_SECRET_ARN")?,
            aws_region: or_default("AWS_REGION", "us-east-1"),
            batch_size: parse(&lookup, "QUEUE_BATCH_SIZE", 50)?,
            concurrency: parse(&lookup, "QUEUE_CONCURRENCY", 10)?,
            claim_order: parse(&lookup, "QUEUE_CLAIM_ORDER", ClaimOrder::Scheduled)?,
            minutes_per_chunk: parse(&lookup, "MINUTES_PER_CHUNK", 4)?,
            worker_timeout: (worker_timeout_secs > 0)
                .then(|| Duration::from_secs(worker_timeout_secs)),
            orphan_timeout: Duration::from_secs(
                parse::<u64, _>(&lookup, "ORPHAN_TIMEOUT_MINUTES", 30)? * 60,
            ),
            dispatch_mode: parse(&lookup, "DISPATCH_MODE", DispatchMode::SelfInvoke)?,
            function_name: or_default("AWS_LAMBDA_FUNCTION_NAME", "generate-alarm-audio"),
            audio_bucket: or_default("AUDIO_BUCKET", "audio-files"),
            storage_api_url: or_default("STORAGE_API_URL", ""),
            storage_key_secret_arn: or_default("STORAGE_API_KEY_SECRET_ARN", ""),
            bedrock_model_id: or_default(
                "BEDROCK_MODEL_ID",
                "anthropic.claude-3-5-haiku-20241022-v1:0",
            ),
            default_voice: or_default("DEFAULT_VOICE", "Joanna"),
            audio_expiration_hours: parse(&lookup, "AUDIO_EXPIRATION_HOURS", 48)?,
        };
        config.check_orphan_timeout()?;
        Ok(config)
    }

    /// Longest a full batch can hold its claims: every chunk running to the
    /// worker timeout. `None` when workers are unbounded.
    pub fn worst_case_batch_time(&self) -> Option<Duration> {
        let chunks = self.batch_size.div_ceil(self.concurrency.max(1)) as u32;
        self.worker_timeout.map(|timeout| timeout * chunks)
    }

    /// The sweep must not release claims a live batch may still reach.
    fn check_orphan_timeout(&self) -> Result<()> {
        match self.worst_case_batch_time() {
            Some(worst) if self.orphan_timeout < worst => Err(Error::Config(format!(
                "ORPHAN_TIMEOUT_MINUTES ({}) is shorter than the worst-case batch time of {}s \
                 (QUEUE_BATCH_SIZE / QUEUE_CONCURRENCY chunks x WORKER_TIMEOUT_SECS)",
                self.orphan_timeout.as_secs() / 60,
                worst.as_secs()
            ))),
            _ => Ok(()),
        }
    }
}

fn parse<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid {}: {}", key, e))),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const BASE: [(&str, &str); 2] = [
        ("DATABASE_HOST", "db.internal"),
        ("DATABASE_URL_SECRET_ARN", "arn:aws:secretsmanager:db"),
    ];

    #[test]
    fn defaults_apply() {
        let config = Config::from_lookup(lookup(&BASE)).unwrap();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.claim_order, ClaimOrder::Scheduled);
        assert_eq!(config.dispatch_mode, DispatchMode::SelfInvoke);
        assert_eq!(config.worker_timeout, Some(Duration::from_secs(240)));
        assert_eq!(config.orphan_timeout, Duration::from_secs(30 * 60));
        assert_eq!(config.worst_case_batch_time(), Some(Duration::from_secs(5 * 240)));
        assert_eq!(config.audio_expiration_hours, 48);
    }

    #[test]
    fn overrides_are_parsed() {
        let mut vars = BASE.to_vec();
        vars.extend([
            ("QUEUE_BATCH_SIZE", "5"),
            ("QUEUE_CONCURRENCY", "2"),
            ("QUEUE_CLAIM_ORDER", "priority_desc"),
            ("DISPATCH_MODE", "inline"),
            ("WORKER_TIMEOUT_SECS", "0"),
        ]);
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.claim_order, ClaimOrder::PriorityDesc);
        assert_eq!(config.dispatch_mode, DispatchMode::Inline);
        assert_eq!(config.worker_timeout, None);
    }

    #[test]
    fn orphan_timeout_must_cover_a_full_batch() {
        let mut vars = BASE.to_vec();
        vars.push(("ORPHAN_TIMEOUT_MINUTES", "15"));
        let err = Config::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("ORPHAN_TIMEOUT_MINUTES")));

        // 50 items at 25 per chunk is two chunks of at most 240s.
        vars.push(("QUEUE_CONCURRENCY", "25"));
        let config = Config::from_lookup(lookup(&vars)).unwrap();
        assert_eq!(config.worst_case_batch_time(), Some(Duration::from_secs(480)));

        // Unbounded workers cannot be checked.
        let mut vars = BASE.to_vec();
        vars.extend([("ORPHAN_TIMEOUT_MINUTES", "1"), ("WORKER_TIMEOUT_SECS", "0")]);
        assert!(Config::from_lookup(lookup(&vars)).is_ok());
    }

    #[test]
    fn missing_required_is_config_error() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("DATABASE_HOST")));
    }

    #[test]
    fn invalid_number_is_config_error() {
        let mut vars = BASE.to_vec();
        vars.push(("QUEUE_BATCH_SIZE", "lots"));
        let err = Config::from_lookup(lookup(&vars)).unwrap_err();
        assert!(matches!(err, Error::Config(msg) if msg.contains("QUEUE_BATCH_SIZE")));
    }
}
