//! Configuration loading and validation.
//!
//! Config is a JSON5 file with `${ENV_VAR}` substitution. All sections are
//! optional; accessor methods supply defaults. Components never read the
//! environment themselves — the config object is built once at startup and
//! passed down explicitly.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level Voiceloop configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub orchestrator: Option<OrchestratorConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Reply policy selector for the agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyMode {
    /// Wrap and restate the caller's transcript.
    #[default]
    Echo,
    /// Cycle through `scripted_lines`.
    Scripted,
}

/// Turn-taking agent configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Room to join when none is given on the command line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,

    #[serde(default)]
    pub reply_mode: ReplyMode,

    /// Lines used in scripted mode, cycled per session.
    #[serde(default = "default_scripted_lines")]
    pub scripted_lines: Vec<String>,

    /// Cancel in-flight synthesis when the caller starts talking over it.
    #[serde(default = "default_true")]
    pub barge_in: bool,

    /// VAD aggressiveness, 0 (permissive) to 3 (strict).
    #[serde(default = "default_vad_aggressiveness")]
    pub vad_aggressiveness: u8,

    /// Seconds to wait for a final transcript before abandoning the turn.
    #[serde(default = "default_stt_timeout_secs")]
    pub stt_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            room: None,
            reply_mode: ReplyMode::default(),
            scripted_lines: default_scripted_lines(),
            barge_in: true,
            vad_aggressiveness: default_vad_aggressiveness(),
            stt_timeout_secs: default_stt_timeout_secs(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_scripted_lines() -> Vec<String> {
    vec![
        "Hello.".to_string(),
        "How can I help?".to_string(),
        "Goodbye.".to_string(),
    ]
}

fn default_vad_aggressiveness() -> u8 {
    2
}

fn default_stt_timeout_secs() -> u64 {
    5
}

/// Metrics collector configuration — shared by the emitting agent and the
/// collector service itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Ingest endpoint the agent posts turn events to.
    #[serde(default = "default_metrics_endpoint")]
    pub endpoint: String,

    /// Port the collector service listens on.
    #[serde(default = "default_metrics_port")]
    pub port: u16,

    /// Rolling retention window for aggregation, in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_metrics_endpoint(),
            port: default_metrics_port(),
            window_secs: default_window_secs(),
        }
    }
}

fn default_metrics_endpoint() -> String {
    "http://localhost:9100/ingest".into()
}

fn default_metrics_port() -> u16 {
    9100
}

fn default_window_secs() -> u64 {
    60
}

/// Token-issuance and telephony-webhook service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret_env: Option<String>,

    /// Default grant TTL in seconds.
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: u64,

    /// SIP ingress host the telephony webhook dials.
    #[serde(default = "default_sip_ingress_host")]
    pub sip_ingress_host: String,

    /// Optional HMAC secret for webhook body verification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_secret_env: Option<String>,

    #[serde(default = "default_orchestrator_port")]
    pub port: u16,
}

fn default_token_ttl() -> u64 {
    60
}

fn default_sip_ingress_host() -> String {
    "sip.example.com".into()
}

fn default_orchestrator_port() -> u16 {
    8000
}

impl OrchestratorConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    pub fn resolve_api_secret(&self) -> Option<String> {
        resolve_secret_field(&self.api_secret, &self.api_secret_env)
    }

    pub fn resolve_webhook_secret(&self) -> Option<String> {
        resolve_secret_field(&self.webhook_secret, &self.webhook_secret_env)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "voiceloop_agent=debug").
    #[serde(default)]
    pub filters: Vec<String>,
}

fn default_log_format() -> String {
    "plain".into()
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::VoiceloopError::Io)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::VoiceloopError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file location: `~/.voiceloop/config.json`.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn agent(&self) -> AgentConfig {
        self.agent.clone().unwrap_or_default()
    }

    pub fn metrics(&self) -> MetricsConfig {
        self.metrics.clone().unwrap_or_default()
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        self.orchestrator.clone().unwrap_or_default()
    }

    /// Room used when none is passed on the command line.
    pub fn default_room(&self) -> String {
        self.agent
            .as_ref()
            .and_then(|a| a.room.clone())
            .unwrap_or_else(|| "dev-room".to_string())
    }

    /// Get a config value by dotted path (e.g. "metrics.port").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let agent = self.agent();
        if agent.vad_aggressiveness > 3 {
            errors.push(format!(
                "agent.vad_aggressiveness must be 0-3, got {}",
                agent.vad_aggressiveness
            ));
        }
        if agent.reply_mode == ReplyMode::Scripted && agent.scripted_lines.is_empty() {
            errors.push("agent.scripted_lines must not be empty in scripted mode".to_string());
        }
        if agent.stt_timeout_secs == 0 {
            errors.push("agent.stt_timeout_secs cannot be 0".to_string());
        }

        if let Some(orch) = &self.orchestrator {
            if orch.resolve_api_key().is_none() || orch.resolve_api_secret().is_none() {
                warnings.push(
                    "orchestrator has no signing credentials configured; the token service will refuse to start"
                        .to_string(),
                );
            }
            if orch.port == 0 {
                errors.push("orchestrator.port cannot be 0".to_string());
            }
        }

        if let Some(metrics) = &self.metrics {
            if metrics.port == 0 {
                errors.push("metrics.port cannot be 0".to_string());
            }
        }

        (warnings, errors)
    }
}

/// Base directory for Voiceloop data: `~/.voiceloop/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voiceloop")
}
