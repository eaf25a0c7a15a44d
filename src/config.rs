use std::{path::PathBuf, time::Duration};

use color_eyre::{Result, eyre::eyre};
use serde::Deserialize;

use crate::{interaction::Timing, runner::Limits};

/// Environment variable the `ask_llm` client reads its key from.
pub const TOKEN_ENV: &str = "CLAUDE_TOKEN";

#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
	/// Run with visible browser window (non-headless mode)
	#[serde(default)]
	pub visible: bool,
	/// Answer-oracle API key. `CLAUDE_TOKEN` in the environment takes precedence.
	#[serde(default)]
	pub claude_token: Option<String>,
	/// Addressing table to use instead of the builtin one
	#[serde(default)]
	pub addressing: Option<PathBuf>,
	/// Skips the identifier prompt when set
	#[serde(default)]
	pub username: Option<String>,
	/// Number of retries for transient API errors (500, rate limit, etc) (default: 3)
	#[serde(default = "default_api_retries")]
	pub api_retries: u32,
	/// Base delay in ms between API retries, multiplied by attempt number (default: 1000)
	#[serde(default = "default_api_retry_delay_ms")]
	pub api_retry_delay_ms: u64,
	#[serde(default)]
	pub timing: TimingConfig,
	/// Cap on "continue" clicks within one section (default: 20)
	#[serde(default = "default_max_module_advances")]
	pub max_module_advances: usize,
	/// Cap on questions within one assessment (default: 100)
	#[serde(default = "default_max_questions")]
	pub max_questions: usize,
	/// Consecutive failed question reads before the assessment is considered over (default: 3)
	#[serde(default = "default_max_extraction_failures")]
	pub max_extraction_failures: usize,
}

/// All in milliseconds.
#[derive(Clone, Debug, Deserialize)]
pub struct TimingConfig {
	#[serde(default = "default_poll_interval_ms")]
	pub poll_interval_ms: u64,
	#[serde(default = "default_attempt_timeout_ms")]
	pub attempt_timeout_ms: u64,
	#[serde(default = "default_resolve_timeout_ms")]
	pub resolve_timeout_ms: u64,
	#[serde(default = "default_probe_timeout_ms")]
	pub probe_timeout_ms: u64,
	#[serde(default = "default_settle_ms")]
	pub settle_ms: u64,
	#[serde(default = "default_long_wait_ms")]
	pub long_wait_ms: u64,
}

fn default_api_retries() -> u32 {
	3
}

fn default_api_retry_delay_ms() -> u64 {
	1000
}

fn default_max_module_advances() -> usize {
	20
}

fn default_max_questions() -> usize {
	100
}

fn default_max_extraction_failures() -> usize {
	3
}

fn default_poll_interval_ms() -> u64 {
	250
}

fn default_attempt_timeout_ms() -> u64 {
	1500
}

fn default_resolve_timeout_ms() -> u64 {
	10_000
}

fn default_probe_timeout_ms() -> u64 {
	2000
}

fn default_settle_ms() -> u64 {
	2000
}

fn default_long_wait_ms() -> u64 {
	20_000
}

impl Default for TimingConfig {
	fn default() -> Self {
		Self {
			poll_interval_ms: default_poll_interval_ms(),
			attempt_timeout_ms: default_attempt_timeout_ms(),
			resolve_timeout_ms: default_resolve_timeout_ms(),
			probe_timeout_ms: default_probe_timeout_ms(),
			settle_ms: default_settle_ms(),
			long_wait_ms: default_long_wait_ms(),
		}
	}
}

impl Default for AppConfig {
	fn default() -> Self {
		Self {
			visible: false,
			claude_token: None,
			addressing: None,
			username: None,
			api_retries: default_api_retries(),
			api_retry_delay_ms: default_api_retry_delay_ms(),
			timing: TimingConfig::default(),
			max_module_advances: default_max_module_advances(),
			max_questions: default_max_questions(),
			max_extraction_failures: default_max_extraction_failures(),
		}
	}
}

impl AppConfig {
	pub fn from_toml(text: &str) -> Result<Self> {
		toml::from_str(text).map_err(|e| eyre!("Invalid config: {}", e))
	}

	/// Defaults when no path is given.
	pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
		let Some(path) = path else {
			return Ok(Self::default());
		};
		let text = std::fs::read_to_string(path).map_err(|e| eyre!("Failed to read config {}: {}", path.display(), e))?;
		Self::from_toml(&text)
	}

	pub fn timing(&self) -> Timing {
		let ms = Duration::from_millis;
		let t = &self.timing;
		Timing {
			poll_interval: ms(t.poll_interval_ms),
			attempt_timeout: ms(t.attempt_timeout_ms),
			resolve_timeout: ms(t.resolve_timeout_ms),
			probe_timeout: ms(t.probe_timeout_ms),
			settle: ms(t.settle_ms),
			long_wait: ms(t.long_wait_ms),
		}
	}

	pub fn limits(&self) -> Limits {
		Limits {
			max_module_advances: self.max_module_advances,
			max_questions: self.max_questions,
			max_extraction_failures: self.max_extraction_failures,
		}
	}

	pub fn api_retry_delay(&self) -> Duration {
		Duration::from_millis(self.api_retry_delay_ms)
	}

	/// The environment wins over the file. Blank values count as absent.
	pub fn resolve_api_key(&self, env_value: Option<String>) -> Option<String> {
		env_value.or_else(|| self.claude_token.clone()).filter(|k| !k.trim().is_empty())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn empty_file_gives_defaults() {
		let config = AppConfig::from_toml("").unwrap();
		assert!(!config.visible);
		assert_eq!(config.api_retries, 3);
		assert_eq!(config.limits(), Limits::default());
		let timing = config.timing();
		assert_eq!(timing.poll_interval, Duration::from_millis(250));
		assert_eq!(timing.resolve_timeout, Duration::from_secs(10));
		assert_eq!(timing.long_wait, Duration::from_secs(20));
	}

	#[test]
	fn partial_timing_keeps_other_defaults() {
		let config = AppConfig::from_toml(
			r#"
			visible = true
			max_questions = 40
			[timing]
			settle_ms = 500
			"#,
		)
		.unwrap();
		assert!(config.visible);
		assert_eq!(config.max_questions, 40);
		assert_eq!(config.timing().settle, Duration::from_millis(500));
		assert_eq!(config.timing().probe_timeout, Duration::from_secs(2));
	}

	#[test]
	fn env_key_wins_over_file() {
		let config = AppConfig::from_toml(r#"claude_token = "from-file""#).unwrap();
		assert_eq!(config.resolve_api_key(Some("from-env".into())).as_deref(), Some("from-env"));
		assert_eq!(config.resolve_api_key(None).as_deref(), Some("from-file"));
		assert_eq!(AppConfig::default().resolve_api_key(Some("  ".into())), None);
	}

	#[test]
	fn unknown_types_are_rejected() {
		assert!(AppConfig::from_toml("max_questions = \"many\"").is_err());
	}
}
