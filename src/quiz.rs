//! Answering one assessment, question by question, and pressing the terminal control at the end.

use std::{fmt, time::Duration};

use tokio::time::sleep;
use tracing::{debug, warn};
use v_utils::{elog, log};

use crate::{
	ChoiceRecord, OracleAnswer, QuestionRecord,
	browser::Browser,
	interaction::Interaction,
	llm::{AnswerOracle, answer_or_fallback},
	locator::Role,
	resolver::ResolvedElement,
	termination::{self, Progress, TerminationReason, TerminationSnapshot, find_progress, is_terminal_label, parse_progress},
	traversal::EntryKind,
};

const MULTI_PHRASES: [&str; 7] = ["select all", "all that apply", "choose two", "choose three", "more than one", "select two", "select three"];
const EXTRACTION_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum QuizState {
	NotStarted,
	Started,
	Answering(usize),
	Submitting,
	Finishing,
	Completed,
}

/// Where the terminal control is looked for, in [`FinishTier::ORDER`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FinishTier {
	/// Inside a visible confirmation dialog.
	Modal,
	/// Anywhere in the document, once a blocking overlay is showing (or there is none).
	Overlay,
	/// On the results document the address moved to.
	ResultsPage,
}

impl FinishTier {
	pub const ORDER: [FinishTier; 3] = [FinishTier::Modal, FinishTier::Overlay, FinishTier::ResultsPage];
}

impl fmt::Display for FinishTier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FinishTier::Modal => f.write_str("modal"),
			FinishTier::Overlay => f.write_str("page"),
			FinishTier::ResultsPage => f.write_str("results page"),
		}
	}
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct QuizReport {
	pub answered: usize,
	/// The terminal control was found and clicked.
	pub finished: bool,
	pub termination: Option<TerminationReason>,
}

impl QuizReport {
	pub fn failed(&self) -> bool {
		self.answered == 0
	}
}

/// What happened after a question was answered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum AfterSubmit {
	NextQuestion,
	Finish(TerminationReason),
	Ended(TerminationReason),
}

pub struct QuizEngine<'a, B: Browser, O: AnswerOracle> {
	ui: &'a Interaction<B>,
	oracle: &'a O,
	max_questions: usize,
	max_extraction_failures: usize,
	state: QuizState,
}

impl<'a, B: Browser, O: AnswerOracle> QuizEngine<'a, B, O> {
	pub fn new(ui: &'a Interaction<B>, oracle: &'a O, max_questions: usize, max_extraction_failures: usize) -> Self {
		Self {
			ui,
			oracle,
			max_questions,
			max_extraction_failures,
			state: QuizState::NotStarted,
		}
	}

	pub fn state(&self) -> QuizState {
		self.state
	}

	pub async fn run(&mut self, entry: EntryKind) -> QuizReport {
		let mut report = QuizReport::default();
		match entry {
			EntryKind::Start => self.start().await,
			EntryKind::Resume => debug!("resuming an attempt, no start control expected"),
		}
		self.state = QuizState::Started;

		loop {
			if report.answered >= self.max_questions {
				elog!("Stopped after {} questions", report.answered);
				break;
			}
			let ordinal = report.answered + 1;
			self.state = QuizState::Answering(ordinal);

			let Some(question) = self.extract_with_retry(ordinal).await else {
				let reason = self.classify(false).await;
				log!("No question on screen ({reason}), leaving the assessment");
				report.termination = Some(reason);
				break;
			};

			let marker = if question.allows_multiple { "[multi]" } else { "[single]" };
			log!("--- Question {ordinal} {marker} ---");
			log!("{question}");

			let answer = answer_or_fallback(self.oracle, &question).await;
			log!("Selected: {answer}");
			self.select_choices(&question, &answer).await;
			report.answered += 1;

			match self.submit().await {
				AfterSubmit::NextQuestion => continue,
				AfterSubmit::Finish(reason) => {
					report.termination = Some(reason);
					report.finished = self.finish().await;
					break;
				}
				AfterSubmit::Ended(reason) => {
					log!("Assessment ended ({reason})");
					report.termination = Some(reason);
					break;
				}
			}
		}

		log!("Answered {} question(s)", report.answered);
		report
	}

	async fn start(&mut self) {
		match self.ui.find(Role::StartQuiz, self.ui.timing().resolve_timeout).await {
			Some(button) => {
				log!("Starting the assessment...");
				if let Err(e) = self.ui.click(&button).await {
					elog!("Failed to click start: {e}");
				}
				self.ui.settle().await;
			}
			None => debug!("no start control, assuming the first question is already up"),
		}
	}

	async fn extract_with_retry(&self, ordinal: usize) -> Option<QuestionRecord> {
		for attempt in 1..=self.max_extraction_failures {
			if let Some(question) = self.extract(ordinal).await {
				return Some(question);
			}
			debug!("question extraction failed (attempt {attempt}/{})", self.max_extraction_failures);
			if attempt < self.max_extraction_failures {
				sleep(EXTRACTION_RETRY_DELAY).await;
			}
		}
		None
	}

	/// Read the question currently on screen. `None` when the prompt or its choices are missing.
	pub async fn extract(&self, ordinal: usize) -> Option<QuestionRecord> {
		let prompt = self.ui.find(Role::QuestionPrompt, self.ui.timing().probe_timeout).await?;
		let controls = self.ui.collect(Role::ChoiceControl, Duration::ZERO).await;
		if controls.is_empty() {
			return None;
		}

		let choices = controls
			.iter()
			.enumerate()
			.map(|(i, control)| ChoiceRecord {
				ordinal: i + 1,
				text: choice_text(control, i + 1),
				selected: control.facts.selected,
			})
			.collect();
		let prompt_text = prompt.text().trim().to_string();
		let allows_multiple = self.allows_multiple(&prompt_text, &controls).await;

		Some(QuestionRecord {
			ordinal,
			prompt: prompt_text,
			choices,
			allows_multiple,
		})
	}

	async fn allows_multiple(&self, prompt: &str, controls: &[ResolvedElement]) -> bool {
		if controls.iter().any(|c| c.facts.kind.eq_ignore_ascii_case("checkbox")) {
			return true;
		}
		if let Some(container) = self.ui.find(Role::QuestionContainer, Duration::ZERO).await
			&& self.ui.attribute(&container, "aria-multiselectable").await.ok().flatten().is_some_and(|v| v.eq_ignore_ascii_case("true"))
		{
			return true;
		}
		mentions_multiple(prompt) || mentions_multiple(&self.ui.body_text().await)
	}

	/// Click the indicated choices that aren't selected yet. Returns how many were clicked.
	pub async fn select_choices(&self, question: &QuestionRecord, answer: &OracleAnswer) -> usize {
		let wanted = if question.allows_multiple { answer.ordinals().to_vec() } else { vec![answer.first()] };
		let mut clicked = 0;
		for ordinal in wanted {
			if ordinal == 0 || ordinal > question.choices.len() {
				warn!("choice {ordinal} is out of range for {} choices, ignoring", question.choices.len());
				continue;
			}
			// Earlier clicks may have re-rendered the choices.
			let controls = self.ui.collect(Role::ChoiceControl, self.ui.timing().attempt_timeout).await;
			let Some(control) = controls.get(ordinal - 1) else {
				warn!("choice {ordinal} disappeared before it could be clicked");
				continue;
			};
			if control.facts.selected {
				debug!("choice {ordinal} already selected");
				continue;
			}
			match self.ui.click(control).await {
				Ok(method) => {
					debug!("selected choice {ordinal} via {method:?}");
					clicked += 1;
				}
				Err(e) => elog!("Failed to select choice {ordinal}: {e}"),
			}
		}
		clicked
	}

	async fn progress(&self) -> Option<Progress> {
		if let Some(label) = self.ui.find(Role::ProgressLabel, Duration::ZERO).await
			&& let Some(p) = parse_progress(label.text())
		{
			return Some(p);
		}
		find_progress(&self.ui.body_text().await)
	}

	async fn submit(&mut self) -> AfterSubmit {
		self.state = QuizState::Submitting;
		let last = self.progress().await.is_some_and(|p| {
			debug!("progress {} of {}", p.current, p.total);
			p.is_last()
		});
		if last {
			let terminal = self.ui.collect(Role::CompleteAssessment, Duration::ZERO).await;
			if !terminal.iter().any(ResolvedElement::visible) {
				// The terminal control only shows up once the last answer is sent.
				debug!("no terminal control next to the last question, submitting it first");
				self.advance().await;
				self.ui.settle().await;
			}
			return AfterSubmit::Finish(TerminationReason::LastByProgress);
		}

		if let Some(submit) = self.advance().await {
			return AfterSubmit::Finish(submit);
		}
		self.ui.settle().await;

		if self.ui.is_present(Role::QuestionPrompt, self.ui.timing().probe_timeout).await {
			return AfterSubmit::NextQuestion;
		}
		AfterSubmit::Ended(self.classify(false).await)
	}

	/// Click "next", or "submit" when there is no next. A submit control that reads as terminal is left for the finish
	/// path and reported instead of clicked.
	async fn advance(&self) -> Option<TerminationReason> {
		let probe = self.ui.timing().probe_timeout;
		if let Some(next) = self.ui.find(Role::NextQuestion, probe).await {
			if let Err(e) = self.ui.click(&next).await {
				elog!("Failed to go to the next question: {e}");
			}
		} else if let Some(submit) = self.ui.find(Role::SubmitAnswer, probe).await {
			if is_terminal_label(submit.text()) {
				return Some(TerminationReason::TerminalLabel);
			}
			if let Err(e) = self.ui.click(&submit).await {
				elog!("Failed to submit the answer: {e}");
			}
		} else {
			warn!("neither a next nor a submit control is on screen");
		}
		None
	}

	async fn classify(&self, question_present: bool) -> TerminationReason {
		let submit_label = self.ui.find(Role::SubmitAnswer, Duration::ZERO).await.map(|el| el.text().to_string());
		let snapshot = TerminationSnapshot {
			progress: self.progress().await,
			submit_label,
			url: self.ui.url().await,
			results_pattern: self.ui.table().results_pattern.clone(),
			question_present,
		};
		termination::evaluate(&snapshot).unwrap_or(TerminationReason::QuestionAbsent)
	}

	/// Click the terminal control. A miss is logged, not an error: the answers are already in.
	async fn finish(&mut self) -> bool {
		self.state = QuizState::Finishing;
		log!("Completing the assessment...");
		for tier in FinishTier::ORDER {
			let Some(button) = self.finish_target(tier).await else {
				debug!("no terminal control at the {tier} tier");
				continue;
			};
			match self.ui.click(&button).await {
				Ok(_) => {
					log!("Assessment completed ({tier})");
					self.ui.settle().await;
					if tier != FinishTier::Modal {
						self.confirm().await;
					}
					self.state = QuizState::Completed;
					return true;
				}
				Err(e) => warn!("terminal click at the {tier} tier failed: {e}"),
			}
		}
		warn!("terminal control not found, counting the assessment as processed anyway");
		self.state = QuizState::Completed;
		false
	}

	/// The page control may open a confirmation dialog with its own terminal control.
	async fn confirm(&self) {
		let ui = self.ui;
		if !ui.is_present(Role::ModalContainer, ui.timing().probe_timeout).await {
			return;
		}
		if let Some(button) = self.finish_target(FinishTier::Modal).await {
			match ui.click(&button).await {
				Ok(_) => {
					log!("Confirmed completion");
					ui.settle().await;
				}
				Err(e) => warn!("confirmation click failed: {e}"),
			}
		}
	}

	async fn finish_target(&self, tier: FinishTier) -> Option<ResolvedElement> {
		match tier {
			FinishTier::Modal => {
				for modal in self.ui.collect(Role::ModalContainer, Duration::ZERO).await.into_iter().filter(ResolvedElement::visible) {
					let found = self.ui.collect_in(Role::CompleteAssessment, &modal, Duration::ZERO).await;
					if let Some(button) = found.into_iter().find(ResolvedElement::visible) {
						return Some(button);
					}
				}
				None
			}
			FinishTier::Overlay => {
				// Overlays that are hidden (suppressed before a click, or never shown) don't block anything.
				let overlays: Vec<_> = self.ui.collect(Role::BlockingOverlay, Duration::ZERO).await.into_iter().filter(ResolvedElement::visible).collect();
				let mut showing = overlays.is_empty();
				for overlay in &overlays {
					if self.ui.opacity(overlay).await.is_ok_and(|o| o > 0.0) {
						showing = true;
						break;
					}
				}
				if !showing {
					return None;
				}
				self.ui.collect(Role::CompleteAssessment, Duration::ZERO).await.into_iter().find(ResolvedElement::visible)
			}
			FinishTier::ResultsPage => {
				let pattern = &self.ui.table().results_pattern;
				if pattern.is_empty() || !self.ui.url().await.contains(pattern.as_str()) {
					return None;
				}
				self.ui.find(Role::CompleteAssessment, self.ui.timing().probe_timeout).await
			}
		}
	}
}

fn mentions_multiple(text: &str) -> bool {
	let lower = text.to_lowercase();
	MULTI_PHRASES.iter().any(|p| lower.contains(p))
}

/// Inputs carry no text of their own; their label usually sits next to them.
fn choice_text(control: &ResolvedElement, ordinal: usize) -> String {
	let own = control.text().trim();
	if !own.is_empty() {
		return own.to_string();
	}
	control
		.facts
		.sibling_texts
		.iter()
		.map(|t| t.trim())
		.find(|t| !t.is_empty())
		.map(str::to_string)
		.unwrap_or_else(|| format!("Choice {ordinal}"))
}
