use std::{fmt, time::Duration};

use derive_new::new;
use tokio::time::sleep;
use tracing::{debug, warn};
use v_utils::{elog, log};

use crate::{
	browser::Browser,
	error::{EngineError, EngineResult},
	interaction::Interaction,
	locator::Role,
	navigator::{LogicalPage, SessionNavigator},
};

/// Operator-supplied sign-in data. The secret never reaches a log line.
#[derive(Clone, new)]
pub struct Credentials {
	pub username: String,
	pub password: String,
}

impl fmt::Debug for Credentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Credentials").field("username", &self.username).field("password", &"<redacted>").finish()
	}
}

/// Linear login progression. Each variant names the state reached once its step succeeds.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AuthStep {
	Start,
	MenuRevealed,
	RedirectedToSignIn,
	IdentifierFilled,
	Advanced,
	SecretFilled,
	Submitted,
	Verified,
	Unverified,
}

impl fmt::Display for AuthStep {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			AuthStep::Start => "start",
			AuthStep::MenuRevealed => "reveal sign-in menu",
			AuthStep::RedirectedToSignIn => "redirect to sign-in",
			AuthStep::IdentifierFilled => "fill identifier",
			AuthStep::Advanced => "advance",
			AuthStep::SecretFilled => "fill secret",
			AuthStep::Submitted => "submit",
			AuthStep::Verified => "verified",
			AuthStep::Unverified => "unverified",
		};
		f.write_str(s)
	}
}

/// Ways of getting the identifier into its field, cheapest first.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IdentifierTactic {
	/// The field already holds focus after the redirect; write straight into it.
	FocusedField,
	/// Resolve, clear, then type one character at a time with jittered pauses.
	Humanlike,
	/// Assign `value` from page context and fire `input`/`change`.
	ScriptedAssign,
}

impl IdentifierTactic {
	pub const ORDER: [IdentifierTactic; 3] = [IdentifierTactic::FocusedField, IdentifierTactic::Humanlike, IdentifierTactic::ScriptedAssign];
}

const FOCUS_POLLS: usize = 10;
const FOCUS_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct AuthenticationFlow<'a, B: Browser> {
	ui: &'a Interaction<B>,
}

impl<'a, B: Browser> AuthenticationFlow<'a, B> {
	pub fn new(ui: &'a Interaction<B>) -> Self {
		Self { ui }
	}

	/// Drive the whole form. Returns [`AuthStep::Verified`] or [`AuthStep::Unverified`]; anything else that goes
	/// wrong is an [`EngineError::AuthenticationFailed`] naming the step.
	pub async fn login(&self, credentials: &Credentials) -> EngineResult<AuthStep> {
		let ui = self.ui;
		let timing = ui.timing();

		log!("Opening the landing page...");
		ui.navigate(&ui.table().page(LogicalPage::Landing).url).await.map_err(|e| EngineError::auth(AuthStep::Start, e))?;
		ui.settle().await;

		log!("Revealing the sign-in menu...");
		let menu = ui.require(Role::SignInMenu, timing.resolve_timeout).await.map_err(|e| EngineError::auth(AuthStep::MenuRevealed, e))?;
		ui.hover(&menu).await.map_err(|e| EngineError::auth(AuthStep::MenuRevealed, e))?;

		log!("Following the student sign-in link...");
		let link = ui.require(Role::StudentSignIn, timing.resolve_timeout).await.map_err(|e| EngineError::auth(AuthStep::RedirectedToSignIn, e))?;
		ui.click(&link).await.map_err(|e| EngineError::auth(AuthStep::RedirectedToSignIn, e))?;
		let nav = SessionNavigator::new(ui);
		if !nav.is_on(LogicalPage::SignIn, timing.resolve_timeout).await {
			warn!("sign-in page not confirmed, continuing at {}", ui.url().await);
		}

		let hidden = ui.suppress_overlays().await;
		if hidden > 0 {
			debug!("hid {hidden} overlay(s) on the sign-in form");
		}

		log!("Filling the username...");
		let tactic = self.fill_identifier(&credentials.username).await?;
		debug!("identifier filled via {tactic:?}");

		let advance = ui.require(Role::AdvanceButton, timing.resolve_timeout).await.map_err(|e| EngineError::auth(AuthStep::Advanced, e))?;
		ui.click(&advance).await.map_err(|e| EngineError::auth(AuthStep::Advanced, e))?;
		ui.settle().await;

		log!("Filling the password...");
		self.fill_secret(&credentials.password).await.map_err(|e| EngineError::auth(AuthStep::SecretFilled, e))?;

		log!("Signing in...");
		let connect = ui.require(Role::ConnectButton, timing.resolve_timeout).await.map_err(|e| EngineError::auth(AuthStep::Submitted, e))?;
		ui.click(&connect).await.map_err(|e| EngineError::auth(AuthStep::Submitted, e))?;

		if ui.is_present(Role::LoginLandmark, timing.long_wait).await {
			log!("Login verified");
			Ok(AuthStep::Verified)
		} else {
			elog!("Could not confirm the login (the page may still be loading)");
			Ok(AuthStep::Unverified)
		}
	}

	/// Try each [`IdentifierTactic`] until the field reads back the expected value.
	pub async fn fill_identifier(&self, username: &str) -> EngineResult<IdentifierTactic> {
		for tactic in IdentifierTactic::ORDER {
			match self.apply_identifier(tactic, username).await {
				Ok(false) => continue,
				Ok(true) => {}
				Err(e) => {
					debug!("{tactic:?} identifier fill failed: {e}");
					continue;
				}
			}
			if self.identifier_reads(username).await {
				return Ok(tactic);
			}
			debug!("{tactic:?} left the identifier field with an unexpected value");
		}
		Err(EngineError::auth(AuthStep::IdentifierFilled, "the username field never held the expected value"))
	}

	/// `Ok(false)` when the tactic had nothing to act on.
	async fn apply_identifier(&self, tactic: IdentifierTactic, username: &str) -> EngineResult<bool> {
		let ui = self.ui;
		match tactic {
			IdentifierTactic::FocusedField => {
				for _ in 0..FOCUS_POLLS {
					if let (Some(focused), Some(field)) = (ui.focused().await, ui.find(Role::UsernameField, Duration::ZERO).await)
						&& focused.node_ref == field.node_ref
					{
						ui.clear(&field).await?;
						ui.type_text(&field, username, false).await?;
						return Ok(true);
					}
					sleep(FOCUS_POLL_INTERVAL).await;
				}
				Ok(false)
			}
			IdentifierTactic::Humanlike => {
				let field = ui.require(Role::UsernameField, ui.timing().resolve_timeout).await?;
				ui.clear(&field).await?;
				ui.type_text(&field, username, true).await?;
				Ok(true)
			}
			IdentifierTactic::ScriptedAssign => {
				let field = ui.require(Role::UsernameField, ui.timing().resolve_timeout).await?;
				ui.assign_value(&field, username).await?;
				Ok(true)
			}
		}
	}

	async fn identifier_reads(&self, expected: &str) -> bool {
		let Some(field) = self.ui.find(Role::UsernameField, self.ui.timing().probe_timeout).await else {
			return false;
		};
		self.ui.value(&field).await.is_ok_and(|v| v == expected)
	}

	async fn fill_secret(&self, secret: &str) -> EngineResult<()> {
		let ui = self.ui;
		let field = ui.require(Role::PasswordField, ui.timing().resolve_timeout).await?;
		ui.scroll_into_view(&field).await?;
		// focus by clicking, then re-resolve since the click starts a new generation
		if let Err(e) = ui.click(&field).await {
			debug!("focusing the password field failed: {e}");
		}
		let field = ui.require(Role::PasswordField, ui.timing().probe_timeout).await?;
		ui.clear(&field).await?;
		ui.type_text(&field, secret, false).await
	}
}
