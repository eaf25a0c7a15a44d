//! Multi-strategy element resolution.
//!
//! A [`LogicalLocator`] carries its expressions in preference order. Each sweep walks that order and stops at the first
//! expression that yields a live node; there is no scoring across expressions. Sweeps repeat until the caller's
//! timeout elapses.

use std::time::Duration;

use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, trace};

use crate::{
	browser::{Browser, NodeFacts},
	error::NotFound,
	locator::LogicalLocator,
};

/// Handle into the live document, valid only for the document generation it was obtained in.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedElement {
	pub(crate) node_ref: String,
	pub(crate) generation: u64,
	pub locator: String,
	pub facts: NodeFacts,
}

impl ResolvedElement {
	pub fn visible(&self) -> bool {
		self.facts.visible
	}

	pub fn enabled(&self) -> bool {
		self.facts.enabled
	}

	pub fn text(&self) -> &str {
		&self.facts.text
	}

	pub fn generation(&self) -> u64 {
		self.generation
	}

	/// First non-empty line of the node's text.
	pub fn first_line(&self) -> Option<&str> {
		self.facts.text.lines().map(str::trim).find(|l| !l.is_empty())
	}
}

#[derive(Clone, Debug)]
pub struct ElementResolver {
	/// Upper bound for a single expression attempt.
	pub attempt_timeout: Duration,
	pub poll_interval: Duration,
}

impl ElementResolver {
	pub fn new(attempt_timeout: Duration, poll_interval: Duration) -> Self {
		Self { attempt_timeout, poll_interval }
	}

	/// Every node matched by the first matching expression, in document order.
	pub async fn resolve_all<B: Browser>(
		&self,
		browser: &B,
		locator: &LogicalLocator,
		scope: Option<&ResolvedElement>,
		within: Duration,
		generation: u64,
	) -> Result<Vec<ResolvedElement>, NotFound> {
		let deadline = Instant::now() + within;
		let scope_ref = scope.map(|s| s.node_ref.as_str());

		loop {
			for expr in &locator.expressions {
				match timeout(self.attempt_budget(deadline, within), browser.find_all(scope_ref, expr)).await {
					Ok(Ok(nodes)) if !nodes.is_empty() => {
						trace!("{} matched {} node(s) via {expr}", locator.name, nodes.len());
						return Ok(nodes
							.into_iter()
							.map(|facts| ResolvedElement {
								node_ref: facts.node_ref.clone(),
								generation,
								locator: locator.name.clone(),
								facts,
							})
							.collect());
					}
					Ok(Ok(_)) => {}
					Ok(Err(e)) => debug!("{}: {expr} failed: {e}", locator.name),
					Err(_) => debug!("{}: {expr} timed out", locator.name),
				}
			}

			if Instant::now() >= deadline {
				break;
			}
			sleep(self.poll_interval).await;
		}

		Err(NotFound {
			locator: locator.name.clone(),
			attempted: locator.expressions.iter().map(ToString::to_string).collect(),
		})
	}

	/// A zero `within` asks for one full sweep. Otherwise no attempt runs past the deadline by more than a poll interval.
	fn attempt_budget(&self, deadline: Instant, within: Duration) -> Duration {
		if within.is_zero() {
			return self.attempt_timeout;
		}
		deadline.saturating_duration_since(Instant::now()).min(self.attempt_timeout).max(self.poll_interval)
	}

	pub async fn resolve<B: Browser>(&self, browser: &B, locator: &LogicalLocator, scope: Option<&ResolvedElement>, within: Duration, generation: u64) -> Result<ResolvedElement, NotFound> {
		let mut all = self.resolve_all(browser, locator, scope, within, generation).await?;
		Ok(all.swap_remove(0))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		locator::Expression,
		testing::{FakeBrowser, FakeNode, css, xpath},
	};

	fn resolver() -> ElementResolver {
		ElementResolver::new(Duration::from_millis(500), Duration::from_millis(100))
	}

	#[tokio::test(start_paused = true)]
	async fn first_matching_expression_wins_over_later_matches() {
		let browser = FakeBrowser::new("https://site/page").with_page(
			"https://site/page",
			vec![
				FakeNode::new("by-xpath").matching(xpath("//button")).text("Later"),
				FakeNode::new("by-css").matching(css("button.primary")).text("Preferred"),
				FakeNode::new("by-text").matching(Expression::Text { needle: "Go".into(), within: None }).text("Go"),
			],
		);
		let locator = LogicalLocator::new(
			"go_button",
			vec![css("button.missing"), css("button.primary"), xpath("//button"), Expression::Text { needle: "Go".into(), within: None }],
		);

		let el = resolver().resolve(&browser, &locator, None, Duration::from_secs(1), 7).await.unwrap();
		assert_eq!(el.node_ref, "by-css");
		assert_eq!(el.generation(), 7);
		assert_eq!(el.locator, "go_button");
	}

	#[tokio::test(start_paused = true)]
	async fn collect_all_keeps_document_order() {
		let browser = FakeBrowser::new("https://site/page").with_page(
			"https://site/page",
			vec![FakeNode::new("a").matching(css("li")), FakeNode::new("b").matching(css("li")), FakeNode::new("c").matching(css("li"))],
		);
		let locator = LogicalLocator::new("rows", vec![css("li")]);
		let all = resolver().resolve_all(&browser, &locator, None, Duration::ZERO, 0).await.unwrap();
		let refs: Vec<_> = all.iter().map(|e| e.node_ref.as_str()).collect();
		assert_eq!(refs, ["a", "b", "c"]);
	}

	#[tokio::test(start_paused = true)]
	async fn exhaustion_reports_every_attempted_expression() {
		let browser = FakeBrowser::new("https://site/page");
		let locator = LogicalLocator::new("ghost", vec![css("#nope"), xpath("//nope")]);
		let started = Instant::now();
		let err = resolver().resolve(&browser, &locator, None, Duration::from_secs(2), 0).await.unwrap_err();
		assert!(started.elapsed() >= Duration::from_secs(2));
		assert_eq!(err.locator, "ghost");
		assert_eq!(err.attempted, ["css `#nope`", "xpath `//nope`"]);
	}

	#[tokio::test(start_paused = true)]
	async fn hanging_lookups_stay_within_the_deadline() {
		let browser = FakeBrowser::new("https://site/page").with_lookup_delay(Duration::from_secs(10));
		let locator = LogicalLocator::new("slow", vec![css("#a"), css("#b"), css("#c")]);
		let started = Instant::now();
		let err = resolver().resolve(&browser, &locator, None, Duration::from_millis(600), 0).await.unwrap_err();
		// 500ms for the first expression, the 100ms left for the second, one poll interval for the third
		let elapsed = started.elapsed();
		assert!(elapsed >= Duration::from_millis(600) && elapsed < Duration::from_millis(800), "{elapsed:?}");
		assert_eq!(err.attempted.len(), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn scoped_resolution_only_sees_descendants() {
		let browser = FakeBrowser::new("https://site/page").with_page(
			"https://site/page",
			vec![
				FakeNode::new("card-1").matching(css("li.card")),
				FakeNode::new("title-1").matching(css("h3")).within("card-1").text("First"),
				FakeNode::new("card-2").matching(css("li.card")),
				FakeNode::new("title-2").matching(css("h3")).within("card-2").text("Second"),
			],
		);
		let cards = resolver().resolve_all(&browser, &LogicalLocator::new("card", vec![css("li.card")]), None, Duration::ZERO, 0).await.unwrap();
		let title = resolver()
			.resolve(&browser, &LogicalLocator::new("title", vec![css("h3")]), Some(&cards[1]), Duration::ZERO, 0)
			.await
			.unwrap();
		assert_eq!(title.text(), "Second");
	}
}
