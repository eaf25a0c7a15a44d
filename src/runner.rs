//! Drives a class section by section until nothing is pending.

use std::fmt;

use tracing::debug;
use v_utils::{elog, log};

use crate::{
	browser::Browser,
	catalog::{ClassCatalog, SectionRecord},
	interaction::Interaction,
	llm::AnswerOracle,
	quiz::{QuizEngine, QuizReport},
	traversal::SectionTraversal,
};

/// Caps for one run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Limits {
	pub max_module_advances: usize,
	pub max_questions: usize,
	pub max_extraction_failures: usize,
}

impl Default for Limits {
	fn default() -> Self {
		Self {
			max_module_advances: 20,
			max_questions: 100,
			max_extraction_failures: 3,
		}
	}
}

/// The only state carried from one section to the next.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TraversalCursor {
	pub class_ordinal: usize,
	/// Sections up to and including this ordinal are not looked at again.
	pub last_completed: Option<usize>,
}

impl TraversalCursor {
	/// Cursor whose next pick is the first pending section at or after `section_ordinal`.
	pub fn starting_at(class_ordinal: usize, section_ordinal: usize) -> Self {
		Self {
			class_ordinal,
			last_completed: section_ordinal.checked_sub(1).filter(|&n| n > 0),
		}
	}

	fn admits(&self, section: &SectionRecord) -> bool {
		self.last_completed.is_none_or(|last| section.ordinal > last)
	}
}

#[derive(Clone, Debug)]
pub struct SectionOutcome {
	pub ordinal: usize,
	pub title: String,
	pub modules_advanced: usize,
	/// `None` when the section had no assessment to enter.
	pub quiz: Option<QuizReport>,
	pub returned: bool,
}

impl SectionOutcome {
	pub fn failed(&self) -> bool {
		self.quiz.as_ref().is_none_or(QuizReport::failed)
	}
}

impl fmt::Display for SectionOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}. {}: ", self.ordinal, self.title)?;
		match &self.quiz {
			Some(report) if report.finished => write!(f, "{} answered, completed", report.answered),
			Some(report) => write!(f, "{} answered", report.answered),
			None => write!(f, "no assessment"),
		}
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StopReason {
	/// No pending section left past the cursor.
	TraversalExhausted,
	/// The class listed no sections at all.
	NoSections,
	SelectionFailed { ordinal: usize },
}

impl fmt::Display for StopReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StopReason::TraversalExhausted => write!(f, "all sections done"),
			StopReason::NoSections => write!(f, "no sections found"),
			StopReason::SelectionFailed { ordinal } => write!(f, "could not open section {ordinal}"),
		}
	}
}

#[derive(Clone, Debug)]
pub struct RunSummary {
	pub processed: Vec<SectionOutcome>,
	pub stop: StopReason,
}

pub struct ProgressOrchestrator<'a, B: Browser, O: AnswerOracle> {
	ui: &'a Interaction<B>,
	oracle: &'a O,
	limits: Limits,
	session_id: String,
}

impl<'a, B: Browser, O: AnswerOracle> ProgressOrchestrator<'a, B, O> {
	pub fn new(ui: &'a Interaction<B>, oracle: &'a O, limits: Limits, session_id: impl Into<String>) -> Self {
		Self {
			ui,
			oracle,
			limits,
			session_id: session_id.into(),
		}
	}

	/// Expects the class page to be open. Sections are re-read after every pass since completing one changes the others.
	pub async fn run(&self, mut cursor: TraversalCursor) -> RunSummary {
		let catalog = ClassCatalog::new(self.ui);
		let mut processed = Vec::new();

		let stop = loop {
			let sections = catalog.sections().await;
			if sections.is_empty() {
				elog!("No sections found");
				break StopReason::NoSections;
			}
			let Some(target) = sections.iter().find(|s| !s.is_complete && cursor.admits(s)) else {
				log!("No pending sections left");
				break StopReason::TraversalExhausted;
			};
			log!("\n==================== Section {} ====================", target.ordinal);
			log!("{target}");

			let Some(outcome) = self.process(target).await else {
				break StopReason::SelectionFailed { ordinal: target.ordinal };
			};
			if outcome.failed() {
				self.snapshot().await;
			}
			log!("{outcome}");
			processed.push(outcome);
			cursor.last_completed = Some(target.ordinal);
			debug!(?cursor, "advanced");
		};

		log!("Processed {} section(s), stopped: {stop}", processed.len());
		RunSummary { processed, stop }
	}

	async fn process(&self, section: &SectionRecord) -> Option<SectionOutcome> {
		let mut traversal = SectionTraversal::new(self.ui, self.limits.max_module_advances);
		if !traversal.select(section).await {
			return None;
		}
		let modules_advanced = traversal.advance_modules().await;

		let quiz = match traversal.enter_assessment().await {
			Some(kind) => Some(QuizEngine::new(self.ui, self.oracle, self.limits.max_questions, self.limits.max_extraction_failures).run(kind).await),
			None => None,
		};
		let returned = traversal.return_to_list().await;

		Some(SectionOutcome {
			ordinal: section.ordinal,
			title: section.title.clone(),
			modules_advanced,
			quiz,
			returned,
		})
	}

	#[cfg(feature = "xdg")]
	async fn snapshot(&self) {
		if let Err(e) = crate::snapshot::save_page_html(self.ui.browser(), &self.session_id).await {
			elog!("Failed to save page HTML: {e}");
		}
	}

	#[cfg(not(feature = "xdg"))]
	async fn snapshot(&self) {
		debug!(session = %self.session_id, "snapshots need the xdg feature");
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{
		interaction::Timing,
		llm::FirstChoiceOracle,
		locator::Role,
		testing::{Effect, FakeBrowser, FakeNode, role_css, test_table},
	};

	const CLASS: &str = "https://site/class/1";

	fn section_url(n: usize) -> String {
		format!("https://site/section/{n}")
	}

	fn quiz_url(n: usize) -> String {
		format!("https://site/quiz/{n}")
	}

	fn row(n: usize, title: &str, complete: bool) -> Vec<FakeNode> {
		let id = format!("row{n}");
		let mut r = FakeNode::new(&id).matching(role_css(Role::SectionRow)).text(title).on_click(Effect::Goto(section_url(n)));
		if complete {
			r = r.classes(&["is-complete"]);
		}
		vec![r, FakeNode::new(&format!("{id}-t")).matching(role_css(Role::SectionTitle)).within(&id).text(title)]
	}

	/// Section page with one module to click through, then a one-question quiz whose completion marks the row done.
	fn section_pages(browser: FakeBrowser, n: usize) -> FakeBrowser {
		let take = format!("take{n}");
		browser
			.with_page(
				&section_url(n),
				vec![
					FakeNode::new(&format!("cont{n}"))
						.matching(role_css(Role::ContinueButton))
						.on_click(Effect::Detach(format!("cont{n}")))
						.on_click(Effect::Attach(take.clone())),
					FakeNode::new(&take)
						.matching(role_css(Role::AssessmentEntry))
						.text("Take Assessment")
						.detached()
						.on_click(Effect::Goto(quiz_url(n))),
				],
			)
			.with_page(&quiz_url(n), quiz_nodes(n, true))
	}

	fn quiz_nodes(n: usize, marks_row: bool) -> Vec<FakeNode> {
		let mut complete = FakeNode::new(&format!("complete{n}")).matching(role_css(Role::CompleteAssessment)).on_click(Effect::Record(format!("completed {n}")));
		if marks_row {
			complete = complete.on_click(Effect::AddClass {
				url: CLASS.into(),
				node: format!("row{n}"),
				class: "is-complete".into(),
			});
		}
		vec![
			FakeNode::new(&format!("p{n}")).matching(role_css(Role::QuestionPrompt)).text("Ready?"),
			FakeNode::new(&format!("progress{n}")).matching(role_css(Role::ProgressLabel)).text("Question 1 of 1"),
			FakeNode::new(&format!("c{n}")).matching(role_css(Role::ChoiceControl)).kind("radio").text("Yes").on_click(Effect::Toggle),
			complete,
		]
	}

	fn class_site(rows: &[(&str, bool)]) -> FakeBrowser {
		let mut nodes = Vec::new();
		for (i, (title, complete)) in rows.iter().enumerate() {
			nodes.extend(row(i + 1, title, *complete));
		}
		let mut browser = FakeBrowser::new(CLASS).with_page(CLASS, nodes);
		for n in 1..=rows.len() {
			browser = section_pages(browser, n);
		}
		browser
	}

	fn ui(browser: FakeBrowser) -> Interaction<FakeBrowser> {
		Interaction::new(browser, test_table(&[]), Timing::default())
	}

	#[tokio::test(start_paused = true)]
	async fn processes_only_pending_sections_in_order() {
		let ui = ui(class_site(&[("Section 1", false), ("Section 2", true), ("Section 3", false)]));
		let summary = ProgressOrchestrator::new(&ui, &FirstChoiceOracle, Limits::default(), "test").run(TraversalCursor::default()).await;

		let done: Vec<usize> = summary.processed.iter().map(|o| o.ordinal).collect();
		assert_eq!(done, [1, 3]);
		assert_eq!(summary.stop, StopReason::TraversalExhausted);
		assert_eq!(ui.browser().records(), ["completed 1", "completed 3"]);
		assert!(summary.processed.iter().all(|o| o.returned && o.modules_advanced == 1 && !o.failed()));
		assert_eq!(ui.browser().current_url(), CLASS);
	}

	#[tokio::test(start_paused = true)]
	async fn cursor_skips_sections_before_the_starting_point() {
		let ui = ui(class_site(&[("Section 1", false), ("Section 2", false), ("Section 3", false)]));
		let summary = ProgressOrchestrator::new(&ui, &FirstChoiceOracle, Limits::default(), "test").run(TraversalCursor::starting_at(1, 2)).await;
		let done: Vec<usize> = summary.processed.iter().map(|o| o.ordinal).collect();
		assert_eq!(done, [2, 3]);
	}

	#[tokio::test(start_paused = true)]
	async fn section_that_stays_pending_is_not_retried() {
		// Completing the quiz never marks row 1 complete.
		let browser = class_site(&[("Section 1", false)]).with_page(&quiz_url(1), quiz_nodes(1, false));
		let ui = ui(browser);
		let summary = ProgressOrchestrator::new(&ui, &FirstChoiceOracle, Limits::default(), "test").run(TraversalCursor::default()).await;
		assert_eq!(summary.processed.len(), 1);
		assert_eq!(summary.stop, StopReason::TraversalExhausted);
	}

	#[tokio::test(start_paused = true)]
	async fn empty_class_stops_immediately() {
		let ui = ui(FakeBrowser::new(CLASS));
		let summary = ProgressOrchestrator::new(&ui, &FirstChoiceOracle, Limits::default(), "test").run(TraversalCursor::default()).await;
		assert!(summary.processed.is_empty());
		assert_eq!(summary.stop, StopReason::NoSections);
	}

	#[test]
	fn starting_cursor() {
		assert_eq!(TraversalCursor::starting_at(2, 1).last_completed, None);
		assert_eq!(TraversalCursor::starting_at(2, 4).last_completed, Some(3));
	}
}
