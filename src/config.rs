//! Configuration management for the Makoto integrity engine.

use std::{path::Path, time::Duration as StdDuration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use makoto_core::{duration, HashAlgorithm, WindowKind};
use makoto_stream::{EngineConfig, StreamConfig, WindowSpec};
use makoto_verify::{UnknownInputPolicy, VerifierConfig};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "makoto.toml";
const ENV_PREFIX: &str = "MAKOTO_";

/// Engine and verifier configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed `MAKOTO_` (highest priority)
/// 2. Configuration file (`makoto.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Intervals are ISO 8601 durations such as `PT1M` or `PT30S`.
///
/// # Example
///
/// ```no_run
/// use makoto::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
/// let stream = config.to_stream_config().expect("invalid window settings");
/// println!("sealing {} windows of {:?}", stream.window().kind(), config.window_duration);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // Stream
    /// Stream the engine ingests.
    ///
    /// Environment variable: `MAKOTO_STREAM_ID`
    #[serde(default = "default_stream_id")]
    pub stream_id: String,
    /// Digest algorithm for leaves and tree nodes.
    ///
    /// Environment variable: `MAKOTO_HASH_ALGORITHM`
    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,
    /// Window partitioning: `tumbling`, `sliding` or `session`.
    ///
    /// Environment variable: `MAKOTO_WINDOW_TYPE`
    #[serde(default = "default_window_type")]
    pub window_type: WindowKind,
    /// Window size for tumbling and sliding windows.
    ///
    /// Environment variable: `MAKOTO_WINDOW_DURATION`
    #[serde(default = "default_window_duration")]
    pub window_duration: Option<String>,
    /// Slide interval for sliding windows.
    ///
    /// Environment variable: `MAKOTO_WINDOW_SLIDE`
    #[serde(default)]
    pub window_slide: Option<String>,
    /// Inactivity gap for session windows.
    ///
    /// Environment variable: `MAKOTO_SESSION_GAP`
    #[serde(default)]
    pub session_gap: Option<String>,
    /// How long a window accepts late records after its end. Absent means
    /// no lateness.
    ///
    /// Environment variable: `MAKOTO_ALLOWED_LATENESS`
    #[serde(default)]
    pub allowed_lateness: Option<String>,
    /// Bound on event time disorder used to derive the watermark. Absent
    /// means the watermark only moves when advanced explicitly.
    ///
    /// Environment variable: `MAKOTO_MAX_OUT_OF_ORDERNESS`
    #[serde(default)]
    pub max_out_of_orderness: Option<String>,

    // Sealing
    /// Number of concurrent sealing workers.
    ///
    /// Environment variable: `MAKOTO_SEAL_WORKERS`
    #[serde(default = "default_seal_workers")]
    pub seal_workers: usize,
    /// Leaf count from which tree levels are hashed in parallel.
    ///
    /// Environment variable: `MAKOTO_PARALLEL_THRESHOLD`
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
    /// Sample inclusion proofs embedded per sealed window.
    ///
    /// Environment variable: `MAKOTO_SAMPLE_PROOFS`
    #[serde(default = "default_sample_proofs")]
    pub sample_proofs: usize,
    /// Seconds shutdown waits for queued windows.
    ///
    /// Environment variable: `MAKOTO_SHUTDOWN_TIMEOUT_SECONDS`
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,

    // Verification
    /// Fail verification on policy issues and unknown levels.
    ///
    /// Environment variable: `MAKOTO_STRICT`
    #[serde(default)]
    pub strict: bool,
    /// How inputs without a verified level count toward the aggregate.
    ///
    /// Environment variable: `MAKOTO_UNKNOWN_INPUT_POLICY`
    #[serde(default)]
    pub unknown_input_policy: UnknownInputPolicy,
    /// Deadline for each attestation fetch in milliseconds.
    ///
    /// Environment variable: `MAKOTO_RESOLVE_TIMEOUT_MS`
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,
    /// Largest lineage graph a single run resolves.
    ///
    /// Environment variable: `MAKOTO_MAX_LINEAGE_NODES`
    #[serde(default = "default_max_lineage_nodes")]
    pub max_lineage_nodes: usize,

    // Logging
    /// Log filter used when `RUST_LOG` is unset.
    ///
    /// Environment variable: `MAKOTO_LOG_FILTER`
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Config {
    /// Load configuration from defaults, `makoto.toml`, and `MAKOTO_`
    /// environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Load configuration using `path` as the configuration file.
    ///
    /// A missing file is skipped; environment overrides still apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX));

        let config: Self = figment
            .extract()
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the window definition.
    pub fn to_window_spec(&self) -> Result<WindowSpec> {
        WindowSpec::parse(
            self.window_type,
            self.window_duration.as_deref(),
            self.window_slide.as_deref(),
            self.session_gap.as_deref(),
        )
        .context("Invalid window settings")
    }

    /// Builds the configuration of the configured stream.
    pub fn to_stream_config(&self) -> Result<StreamConfig> {
        let allowed_lateness = optional_interval("allowed_lateness", &self.allowed_lateness)?
            .unwrap_or_else(chrono::Duration::zero);
        let max_out_of_orderness =
            optional_interval("max_out_of_orderness", &self.max_out_of_orderness)?;

        StreamConfig::new(
            self.stream_id.as_str(),
            self.to_window_spec()?,
            allowed_lateness,
            max_out_of_orderness,
            self.hash_algorithm,
        )
        .context("Invalid stream settings")
    }

    /// Builds the stream engine configuration.
    pub fn to_engine_config(&self) -> Result<EngineConfig> {
        EngineConfig::new(
            self.seal_workers,
            self.parallel_threshold,
            self.sample_proofs,
            StdDuration::from_secs(self.shutdown_timeout_seconds),
        )
        .context("Invalid sealing settings")
    }

    /// Builds the chain verifier configuration.
    pub fn to_verifier_config(&self) -> Result<VerifierConfig> {
        VerifierConfig::new(
            self.strict,
            self.unknown_input_policy,
            StdDuration::from_millis(self.resolve_timeout_ms),
            self.max_lineage_nodes,
        )
        .context("Invalid verifier settings")
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.stream_id.trim().is_empty() {
            anyhow::bail!("stream_id must not be empty");
        }

        if self.seal_workers == 0 {
            anyhow::bail!("seal_workers must be greater than 0");
        }

        if self.resolve_timeout_ms == 0 {
            anyhow::bail!("resolve_timeout_ms must be greater than 0");
        }

        if self.log_filter.trim().is_empty() {
            anyhow::bail!("log_filter must not be empty");
        }

        self.to_stream_config()?;
        self.to_engine_config()?;
        self.to_verifier_config()?;
        Ok(())
    }
}

fn optional_interval(name: &str, value: &Option<String>) -> Result<Option<chrono::Duration>> {
    value
        .as_deref()
        .map(|text| duration::parse(text).with_context(|| format!("Invalid {name}")))
        .transpose()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream_id: default_stream_id(),
            hash_algorithm: HashAlgorithm::default(),
            window_type: default_window_type(),
            window_duration: default_window_duration(),
            window_slide: None,
            session_gap: None,
            allowed_lateness: None,
            max_out_of_orderness: None,
            seal_workers: default_seal_workers(),
            parallel_threshold: default_parallel_threshold(),
            sample_proofs: default_sample_proofs(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
            strict: false,
            unknown_input_policy: UnknownInputPolicy::default(),
            resolve_timeout_ms: default_resolve_timeout_ms(),
            max_lineage_nodes: default_max_lineage_nodes(),
            log_filter: default_log_filter(),
        }
    }
}

fn default_stream_id() -> String {
    "default".to_string()
}

fn default_window_type() -> WindowKind {
    WindowKind::Tumbling
}

fn default_window_duration() -> Option<String> {
    Some("PT1M".to_string())
}

fn default_seal_workers() -> usize {
    makoto_stream::DEFAULT_SEAL_WORKERS
}

fn default_parallel_threshold() -> usize {
    makoto_integrity::DEFAULT_PARALLEL_THRESHOLD
}

fn default_sample_proofs() -> usize {
    makoto_stream::DEFAULT_SAMPLE_PROOFS
}

fn default_shutdown_timeout() -> u64 {
    makoto_stream::DEFAULT_SHUTDOWN_TIMEOUT_SECONDS
}

fn default_resolve_timeout_ms() -> u64 {
    makoto_verify::DEFAULT_RESOLVE_TIMEOUT_MS
}

fn default_max_lineage_nodes() -> usize {
    makoto_verify::DEFAULT_MAX_NODES
}

fn default_log_filter() -> String {
    crate::telemetry::DEFAULT_LOG_FILTER.to_string()
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, env, path::PathBuf, sync::Mutex};

    use super::*;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct TestEnvGuard {
        _lock: std::sync::MutexGuard<'static, ()>,
        vars: Vec<String>,
        originals: HashMap<String, Option<String>>,
        files: Vec<PathBuf>,
    }

    impl TestEnvGuard {
        fn new() -> Self {
            let lock = ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Self { _lock: lock, vars: Vec::new(), originals: HashMap::new(), files: Vec::new() }
        }

        fn set_var(&mut self, key: &str, value: &str) {
            if !self.vars.contains(&key.to_string()) {
                self.originals.insert(key.to_string(), env::var(key).ok());
                self.vars.push(key.to_string());
            }
            env::set_var(key, value);
        }

        fn write_file(&mut self, name: &str, contents: &str) -> PathBuf {
            let path = env::temp_dir().join(format!("makoto-{}-{name}", std::process::id()));
            std::fs::write(&path, contents).unwrap();
            self.files.push(path.clone());
            path
        }
    }

    impl Drop for TestEnvGuard {
        fn drop(&mut self) {
            for var in &self.vars {
                match self.originals.get(var) {
                    Some(Some(value)) => env::set_var(var, value),
                    Some(None) => env::remove_var(var),
                    None => {},
                }
            }
            for file in &self.files {
                let _ = std::fs::remove_file(file);
            }
        }
    }

    fn missing_file() -> PathBuf {
        env::temp_dir().join("makoto-config-that-does-not-exist.toml")
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        let stream = config.to_stream_config().unwrap();
        assert_eq!(stream.window().kind(), WindowKind::Tumbling);
        assert_eq!(stream.window().size(), chrono::Duration::minutes(1));
        assert_eq!(stream.allowed_lateness(), chrono::Duration::zero());

        let verifier = config.to_verifier_config().unwrap();
        assert!(!verifier.strict());
        assert_eq!(verifier.unknown_input_policy(), UnknownInputPolicy::BelowL1);
    }

    #[test]
    fn file_values_override_defaults() {
        let mut guard = TestEnvGuard::new();
        let path = guard.write_file(
            "file.toml",
            r#"
            stream_id = "payments"
            hash_algorithm = "blake3"
            window_type = "sliding"
            window_duration = "PT5M"
            window_slide = "PT1M"
            allowed_lateness = "PT10S"
            unknown_input_policy = "treat_as_l1"
            "#,
        );

        let config = Config::load_from(&path).expect("Config should load from file");

        assert_eq!(config.stream_id, "payments");
        assert_eq!(config.hash_algorithm, HashAlgorithm::Blake3);
        let stream = config.to_stream_config().unwrap();
        assert_eq!(stream.window().kind(), WindowKind::Sliding);
        assert_eq!(stream.window().slide(), Some(chrono::Duration::minutes(1)));
        assert_eq!(stream.allowed_lateness(), chrono::Duration::seconds(10));
        assert_eq!(
            config.to_verifier_config().unwrap().unknown_input_policy(),
            UnknownInputPolicy::TreatAsL1
        );
    }

    #[test]
    fn environment_overrides_file() {
        let mut guard = TestEnvGuard::new();
        let path = guard.write_file("env.toml", "seal_workers = 3\nstrict = false\n");
        guard.set_var("MAKOTO_SEAL_WORKERS", "8");
        guard.set_var("MAKOTO_STRICT", "true");
        guard.set_var("MAKOTO_RESOLVE_TIMEOUT_MS", "250");

        let config = Config::load_from(&path).expect("Config should load with env overrides");

        assert_eq!(config.seal_workers, 8);
        assert!(config.strict);
        let verifier = config.to_verifier_config().unwrap();
        assert!(verifier.strict());
        assert_eq!(verifier.resolve_timeout(), StdDuration::from_millis(250));
        assert_eq!(config.to_engine_config().unwrap().worker_count(), 8);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let _guard = TestEnvGuard::new();
        let config = Config::load_from(missing_file()).expect("defaults should load");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn invalid_config_validation_fails() {
        let mut config = Config::default();
        config.seal_workers = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.window_type = WindowKind::Sliding;
        assert!(config.validate().is_err(), "sliding window needs a slide");

        config.window_slide = Some("PT2M".to_string());
        assert!(config.validate().is_err(), "slide exceeds window size");

        config = Config::default();
        config.window_duration = Some("P1M".to_string());
        assert!(config.validate().is_err(), "calendar months have no fixed length");

        config = Config::default();
        config.allowed_lateness = Some("soon".to_string());
        assert!(config.validate().is_err());

        config = Config::default();
        config.max_lineage_nodes = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.resolve_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_environment_value_is_reported() {
        let mut guard = TestEnvGuard::new();
        guard.set_var("MAKOTO_WINDOW_TYPE", "hopping");

        let err = Config::load_from(missing_file()).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to load configuration"), "{err:#}");
    }
}
