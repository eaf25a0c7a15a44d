//! Element interaction façade.
//!
//! Every state-changing call (click, navigate, type, value assignment, back) bumps the document generation; handles
//! obtained before the bump are rejected with [`EngineError::StaleReference`] instead of being sent to the browser.

use std::{cell::Cell, future::Future, time::Duration};

use tokio::time::{Instant, sleep};
use tracing::{debug, trace};

use crate::{
	browser::{Browser, ClickMethod, NodeFacts},
	error::{BrowserError, EngineError, EngineResult},
	locator::{AddressingTable, LogicalLocator, Role},
	resolver::{ElementResolver, ResolvedElement},
};

/// Every wait the engine performs, in one place.
#[derive(Clone, Debug)]
pub struct Timing {
	pub poll_interval: Duration,
	/// Upper bound for a single lookup expression.
	pub attempt_timeout: Duration,
	/// Default wait for elements that must appear.
	pub resolve_timeout: Duration,
	/// Short probes for elements that may legitimately be absent.
	pub probe_timeout: Duration,
	/// Pause after navigation-like actions.
	pub settle: Duration,
	/// Post-login verification and other slow transitions.
	pub long_wait: Duration,
}

impl Default for Timing {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_millis(250),
			attempt_timeout: Duration::from_millis(1500),
			resolve_timeout: Duration::from_secs(10),
			probe_timeout: Duration::from_secs(2),
			settle: Duration::from_secs(2),
			long_wait: Duration::from_secs(20),
		}
	}
}

pub struct Interaction<B: Browser> {
	browser: B,
	table: AddressingTable,
	resolver: ElementResolver,
	timing: Timing,
	generation: Cell<u64>,
}

impl<B: Browser> Interaction<B> {
	pub fn new(browser: B, table: AddressingTable, timing: Timing) -> Self {
		let resolver = ElementResolver::new(timing.attempt_timeout, timing.poll_interval);
		Self {
			browser,
			table,
			resolver,
			timing,
			generation: Cell::new(0),
		}
	}

	pub fn browser(&self) -> &B {
		&self.browser
	}

	/// Give the session back for teardown.
	pub fn into_browser(self) -> B {
		self.browser
	}

	pub fn table(&self) -> &AddressingTable {
		&self.table
	}

	pub fn timing(&self) -> &Timing {
		&self.timing
	}

	pub fn generation(&self) -> u64 {
		self.generation.get()
	}

	fn bump(&self) {
		self.generation.set(self.generation.get() + 1);
	}

	fn ensure_fresh(&self, el: &ResolvedElement) -> EngineResult<()> {
		let current = self.generation.get();
		if el.generation != current {
			return Err(EngineError::StaleReference {
				locator: el.locator.clone(),
				obtained: el.generation,
				current,
			});
		}
		Ok(())
	}

	fn lift(&self, el: &ResolvedElement, e: BrowserError) -> EngineError {
		match e {
			BrowserError::Detached(_) => EngineError::StaleReference {
				locator: el.locator.clone(),
				obtained: el.generation,
				current: self.generation.get(),
			},
			e => EngineError::Browser(e),
		}
	}

	/// Resolve or fail with the full list of attempted expressions.
	pub async fn require(&self, role: Role, within: Duration) -> EngineResult<ResolvedElement> {
		Ok(self.resolver.resolve(&self.browser, self.table.locator(role), None, within, self.generation()).await?)
	}

	pub async fn find(&self, role: Role, within: Duration) -> Option<ResolvedElement> {
		match self.require(role, within).await {
			Ok(el) => Some(el),
			Err(e) => {
				debug!("{e}");
				None
			}
		}
	}

	/// Lookup through a locator built at runtime rather than taken from the table.
	pub async fn find_with(&self, locator: &LogicalLocator, within: Duration) -> Option<ResolvedElement> {
		self.resolver.resolve(&self.browser, locator, None, within, self.generation()).await.ok()
	}

	/// First descendant of `scope` playing `role`. A stale scope finds nothing.
	pub async fn find_in(&self, role: Role, scope: &ResolvedElement, within: Duration) -> Option<ResolvedElement> {
		self.ensure_fresh(scope).ok()?;
		self.resolver.resolve(&self.browser, self.table.locator(role), Some(scope), within, self.generation()).await.ok()
	}

	pub async fn collect(&self, role: Role, within: Duration) -> Vec<ResolvedElement> {
		self.resolver
			.resolve_all(&self.browser, self.table.locator(role), None, within, self.generation())
			.await
			.unwrap_or_default()
	}

	pub async fn collect_in(&self, role: Role, scope: &ResolvedElement, within: Duration) -> Vec<ResolvedElement> {
		if self.ensure_fresh(scope).is_err() {
			return Vec::new();
		}
		self.resolver
			.resolve_all(&self.browser, self.table.locator(role), Some(scope), within, self.generation())
			.await
			.unwrap_or_default()
	}

	/// Elements playing `role` that are direct children of `el`'s parent, `el` itself excluded.
	pub async fn collect_siblings(&self, role: Role, el: &ResolvedElement) -> Vec<ResolvedElement> {
		let Some(parent_ref) = el.facts.parent_ref.as_deref() else {
			return Vec::new();
		};
		let parent = ResolvedElement {
			node_ref: parent_ref.to_string(),
			generation: el.generation,
			locator: format!("parent of {}", el.locator),
			facts: NodeFacts::default(),
		};
		self.collect_in(role, &parent, Duration::ZERO)
			.await
			.into_iter()
			.filter(|s| s.facts.parent_ref.as_deref() == Some(parent_ref) && s.node_ref != el.node_ref)
			.collect()
	}

	/// Whether a visible element playing `role` shows up within `within`.
	pub async fn is_present(&self, role: Role, within: Duration) -> bool {
		let ui = self;
		self.wait_for(within, move || async move { ui.collect(role, Duration::ZERO).await.iter().any(ResolvedElement::visible) })
			.await
	}

	/// Click with escalating delivery methods; the first one the browser accepts wins.
	pub async fn click(&self, el: &ResolvedElement) -> EngineResult<ClickMethod> {
		self.ensure_fresh(el)?;
		match self.browser.suppress_overlays().await {
			Ok(0) => {}
			Ok(n) => debug!("hid {n} overlay(s) before clicking {}", el.locator),
			Err(e) => debug!("overlay suppression failed: {e}"),
		}
		if let Err(e) = self.browser.scroll_into_view(&el.node_ref).await {
			trace!("scroll before click failed: {e}");
		}

		let mut last = None;
		for method in ClickMethod::ESCALATION {
			match self.browser.click(&el.node_ref, method).await {
				Ok(()) => {
					self.bump();
					return Ok(method);
				}
				Err(e @ BrowserError::Detached(_)) => return Err(self.lift(el, e)),
				Err(e) => {
					debug!("{method:?} click on {} failed: {e}", el.locator);
					last = Some(e);
				}
			}
		}
		Err(EngineError::Browser(last.unwrap_or_else(|| BrowserError::ClickIntercepted(el.locator.clone()))))
	}

	pub async fn hover(&self, el: &ResolvedElement) -> EngineResult<()> {
		self.ensure_fresh(el)?;
		self.browser.hover(&el.node_ref).await.map_err(|e| self.lift(el, e))
	}

	pub async fn scroll_into_view(&self, el: &ResolvedElement) -> EngineResult<()> {
		self.ensure_fresh(el)?;
		self.browser.scroll_into_view(&el.node_ref).await.map_err(|e| self.lift(el, e))
	}

	/// Type into the element. With `humanlike`, characters go one at a time with a random 40-140ms pause between them.
	pub async fn type_text(&self, el: &ResolvedElement, text: &str, humanlike: bool) -> EngineResult<()> {
		self.ensure_fresh(el)?;
		if humanlike {
			for c in text.chars() {
				self.browser.send_keys(&el.node_ref, &c.to_string()).await.map_err(|e| self.lift(el, e))?;
				sleep(Duration::from_millis(rand::random_range(40..=140))).await;
			}
		} else {
			self.browser.send_keys(&el.node_ref, text).await.map_err(|e| self.lift(el, e))?;
		}
		self.bump();
		Ok(())
	}

	pub async fn clear(&self, el: &ResolvedElement) -> EngineResult<()> {
		self.ensure_fresh(el)?;
		self.browser.clear(&el.node_ref).await.map_err(|e| self.lift(el, e))
	}

	/// Scripted value assignment with synthetic `input`/`change` events.
	pub async fn assign_value(&self, el: &ResolvedElement, text: &str) -> EngineResult<()> {
		self.ensure_fresh(el)?;
		self.browser.assign_value(&el.node_ref, text).await.map_err(|e| self.lift(el, e))?;
		self.bump();
		Ok(())
	}

	pub async fn value(&self, el: &ResolvedElement) -> EngineResult<String> {
		self.ensure_fresh(el)?;
		self.browser.value(&el.node_ref).await.map_err(|e| self.lift(el, e))
	}

	pub async fn attribute(&self, el: &ResolvedElement, name: &str) -> EngineResult<Option<String>> {
		self.ensure_fresh(el)?;
		self.browser.attribute(&el.node_ref, name).await.map_err(|e| self.lift(el, e))
	}

	pub async fn opacity(&self, el: &ResolvedElement) -> EngineResult<f64> {
		self.ensure_fresh(el)?;
		self.browser.opacity(&el.node_ref).await.map_err(|e| self.lift(el, e))
	}

	pub async fn focused(&self) -> Option<NodeFacts> {
		self.browser.focused().await.ok().flatten()
	}

	pub async fn suppress_overlays(&self) -> usize {
		self.browser.suppress_overlays().await.unwrap_or_else(|e| {
			debug!("overlay suppression failed: {e}");
			0
		})
	}

	pub async fn url(&self) -> String {
		self.browser.url().await.unwrap_or_default()
	}

	pub async fn body_text(&self) -> String {
		self.browser.body_text().await.unwrap_or_default()
	}

	pub async fn navigate(&self, url: &str) -> EngineResult<()> {
		self.bump();
		Ok(self.browser.goto(url).await?)
	}

	pub async fn assign_location(&self, url: &str) -> EngineResult<()> {
		self.bump();
		Ok(self.browser.assign_location(url).await?)
	}

	pub async fn back(&self) -> EngineResult<()> {
		self.bump();
		Ok(self.browser.back().await?)
	}

	pub async fn settle(&self) {
		sleep(self.timing.settle).await;
	}

	/// Poll `predicate` every poll interval until it holds or `timeout` elapses. Always evaluates at least once.
	pub async fn wait_for<F, Fut>(&self, timeout: Duration, mut predicate: F) -> bool
	where
		F: FnMut() -> Fut,
		Fut: Future<Output = bool>, {
		let deadline = Instant::now() + timeout;
		loop {
			if predicate().await {
				return true;
			}
			if Instant::now() >= deadline {
				return false;
			}
			sleep(self.timing.poll_interval).await;
		}
	}
}
