use std::fmt;

use thiserror::Error;

use crate::{login::AuthStep, navigator::LogicalPage};

/// A locator whose every expression came back empty within the allotted time.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("`{locator}` not found (tried: {})", .attempted.join(" | "))]
pub struct NotFound {
	pub locator: String,
	pub attempted: Vec<String>,
}

/// Failures reported by the browser automation surface itself.
#[derive(Clone, Debug, Error)]
pub enum BrowserError {
	#[error("protocol error: {0}")]
	Protocol(String),
	#[error("script error: {0}")]
	Script(String),
	/// The node a handle pointed to is no longer attached to the document.
	#[error("node `{0}` is detached")]
	Detached(String),
	#[error("click on `{0}` was intercepted")]
	ClickIntercepted(String),
}

#[derive(Clone, Debug, Error)]
pub enum OracleError {
	#[error("answer oracle unavailable: {0}")]
	Unavailable(String),
	#[error("answer oracle output unparseable: {0:?}")]
	Unparseable(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
	#[error(transparent)]
	NotFound(#[from] NotFound),
	#[error("could not reach the {page} page (tried: {})", .tactics.join(", "))]
	NavigationTimeout { page: LogicalPage, tactics: Vec<String> },
	/// A handle from an earlier document generation was used after a state-changing interaction.
	#[error("stale handle for `{locator}` (obtained in generation {obtained}, document is at {current})")]
	StaleReference { locator: String, obtained: u64, current: u64 },
	#[error("authentication failed at step {step}: {reason}")]
	AuthenticationFailed { step: AuthStep, reason: String },
	#[error(transparent)]
	Browser(#[from] BrowserError),
}

impl EngineError {
	/// Only these end a run; everything else is absorbed at component boundaries.
	pub fn is_fatal(&self) -> bool {
		matches!(self, EngineError::AuthenticationFailed { .. } | EngineError::Browser(BrowserError::Protocol(_)))
	}

	pub(crate) fn auth(step: AuthStep, reason: impl fmt::Display) -> Self {
		EngineError::AuthenticationFailed { step, reason: reason.to_string() }
	}
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
