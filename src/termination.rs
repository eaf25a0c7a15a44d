//! Deciding whether an assessment is over.
//!
//! The signals are independent and any one of them is enough: the progress label says this was the last question,
//! the submit control is really the terminal one, the address moved to the results page, or no question is left.

use std::{fmt, sync::LazyLock};

use regex::Regex;

static LABEL_PROGRESS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\d+)\s+of\s+(\d+)").expect("LABEL_PROGRESS is a compile-time constant"));
static PAGE_PROGRESS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)\bquestion\s+(\d+)\s+of\s+(\d+)").expect("PAGE_PROGRESS is a compile-time constant"));

/// "Question N of M".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Progress {
	pub current: usize,
	pub total: usize,
}

impl Progress {
	pub fn is_last(&self) -> bool {
		self.total > 0 && self.current >= self.total
	}
}

/// "N of M" from a dedicated progress label.
pub fn parse_progress(label: &str) -> Option<Progress> {
	captured(&LABEL_PROGRESS, &label.to_lowercase())
}

/// Progress anywhere in the page text. Only the full "Question N of M" form counts, since prompts and scores carry
/// their own fractions.
pub fn find_progress(page_text: &str) -> Option<Progress> {
	captured(&PAGE_PROGRESS, page_text)
}

fn captured(re: &Regex, text: &str) -> Option<Progress> {
	let caps = re.captures(text)?;
	let current = caps[1].parse().ok()?;
	let total = caps[2].parse().ok()?;
	Some(Progress { current, total })
}

/// Whether a control label reads as the terminal "complete assessment" action.
pub fn is_terminal_label(label: &str) -> bool {
	let lower = label.to_lowercase();
	lower.contains("complete assessment") || lower.contains("finish assessment")
}

#[derive(Clone, Debug, Default)]
pub struct TerminationSnapshot {
	pub progress: Option<Progress>,
	/// Label of the submit control currently on screen, if any.
	pub submit_label: Option<String>,
	pub url: String,
	pub results_pattern: String,
	pub question_present: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TerminationReason {
	LastByProgress,
	TerminalLabel,
	ResultsUrl,
	QuestionAbsent,
}

impl fmt::Display for TerminationReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			TerminationReason::LastByProgress => "last question by progress label",
			TerminationReason::TerminalLabel => "terminal submit label",
			TerminationReason::ResultsUrl => "results page",
			TerminationReason::QuestionAbsent => "no question on screen",
		};
		f.write_str(s)
	}
}

pub fn last_by_progress(s: &TerminationSnapshot) -> bool {
	s.progress.is_some_and(|p| p.is_last())
}

pub fn terminal_label(s: &TerminationSnapshot) -> bool {
	s.submit_label.as_deref().is_some_and(is_terminal_label)
}

pub fn results_url(s: &TerminationSnapshot) -> bool {
	!s.results_pattern.is_empty() && s.url.contains(&s.results_pattern)
}

pub fn question_absent(s: &TerminationSnapshot) -> bool {
	!s.question_present
}

/// First predicate that holds, in a fixed order so the reported reason is stable.
pub fn evaluate(s: &TerminationSnapshot) -> Option<TerminationReason> {
	let predicates: [(fn(&TerminationSnapshot) -> bool, TerminationReason); 4] = [
		(last_by_progress, TerminationReason::LastByProgress),
		(terminal_label, TerminationReason::TerminalLabel),
		(results_url, TerminationReason::ResultsUrl),
		(question_absent, TerminationReason::QuestionAbsent),
	];
	predicates.into_iter().find(|(holds, _)| holds(s)).map(|(_, reason)| reason)
}
