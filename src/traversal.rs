//! Moving through one section: open it, click through its linear modules, find the assessment, come back.

use std::fmt;

use tracing::{debug, warn};
use v_utils::{elog, log};

use crate::{
	browser::Browser,
	catalog::{ClassCatalog, SectionRecord},
	interaction::Interaction,
	locator::Role,
	resolver::ResolvedElement,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TraversalState {
	Listing,
	Selected,
	AdvancingModules,
	AtAssessmentEntry,
	Returned,
}

/// Whether the assessment control starts a fresh attempt or picks up an earlier one.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryKind {
	Start,
	Resume,
}

impl EntryKind {
	const RESUME_WORDS: [&str; 4] = ["resume", "continue", "in progress", "retake"];

	pub fn classify(label: &str) -> Self {
		let lower = label.to_lowercase();
		if Self::RESUME_WORDS.iter().any(|w| lower.contains(w)) { EntryKind::Resume } else { EntryKind::Start }
	}
}

impl fmt::Display for EntryKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			EntryKind::Start => f.write_str("start"),
			EntryKind::Resume => f.write_str("resume"),
		}
	}
}

#[derive(Clone, Debug)]
pub struct AssessmentEntry {
	pub kind: EntryKind,
	pub label: String,
	pub element: ResolvedElement,
}

pub struct SectionTraversal<'a, B: Browser> {
	ui: &'a Interaction<B>,
	max_module_advances: usize,
	state: TraversalState,
}

impl<'a, B: Browser> SectionTraversal<'a, B> {
	pub fn new(ui: &'a Interaction<B>, max_module_advances: usize) -> Self {
		Self {
			ui,
			max_module_advances,
			state: TraversalState::Listing,
		}
	}

	pub fn state(&self) -> TraversalState {
		self.state
	}

	/// Open `target` by re-querying the rows: exact title, then substring either way, then filtered ordinal.
	pub async fn select(&mut self, target: &SectionRecord) -> bool {
		let rows = ClassCatalog::new(self.ui).content_rows().await;
		let wanted = target.title.trim().to_lowercase();

		let exact = rows.iter().find(|(_, title, _)| title.trim().to_lowercase() == wanted);
		let partial = || {
			rows.iter().find(|(_, title, _)| {
				let t = title.trim().to_lowercase();
				!t.is_empty() && !wanted.is_empty() && (t.contains(&wanted) || wanted.contains(&t))
			})
		};
		let by_ordinal = || rows.iter().find(|(ordinal, ..)| *ordinal == target.ordinal);

		let Some((ordinal, title, row)) = exact.or_else(partial).or_else(by_ordinal) else {
			elog!("Section '{}' not found among {} row(s)", target.title, rows.len());
			return false;
		};
		if title != &target.title {
			debug!("matched '{}' to row {ordinal} '{title}'", target.title);
		}

		log!("Opening section: {title}");
		if let Err(e) = self.ui.click(row).await {
			elog!("Failed to open section '{title}': {e}");
			return false;
		}
		self.ui.settle().await;
		self.state = TraversalState::Selected;
		true
	}

	/// Click "continue" while it keeps showing up. Returns how many modules were advanced.
	pub async fn advance_modules(&mut self) -> usize {
		self.state = TraversalState::AdvancingModules;
		let mut advanced = 0;
		while advanced < self.max_module_advances {
			let Some(button) = self.ui.find(Role::ContinueButton, self.ui.timing().probe_timeout).await else {
				debug!("no continue control, linear modules done");
				break;
			};
			if let Err(e) = self.ui.click(&button).await {
				warn!("continue click failed: {e}");
				break;
			}
			advanced += 1;
			log!("  [{advanced}] Advanced a module");
			self.ui.settle().await;
		}
		if advanced == self.max_module_advances {
			elog!("Stopped after {advanced} module advances");
		}
		advanced
	}

	pub async fn assessment_entry(&mut self) -> Option<AssessmentEntry> {
		let element = self.ui.find(Role::AssessmentEntry, self.ui.timing().resolve_timeout).await?;
		let label = element.text().trim().to_string();
		let kind = EntryKind::classify(&label);
		self.state = TraversalState::AtAssessmentEntry;
		Some(AssessmentEntry { kind, label, element })
	}

	/// Find and click the assessment control. `None` when the section has no assessment or the click fails.
	pub async fn enter_assessment(&mut self) -> Option<EntryKind> {
		let Some(entry) = self.assessment_entry().await else {
			elog!("No assessment entry found in this section");
			return None;
		};
		log!("Entering assessment ({}): {}", entry.kind, entry.label);
		if let Err(e) = self.ui.click(&entry.element).await {
			elog!("Failed to enter the assessment: {e}");
			return None;
		}
		self.ui.settle().await;
		Some(entry.kind)
	}

	/// Back to the section list; a second back-navigation if the first one doesn't land there.
	pub async fn return_to_list(&mut self) -> bool {
		log!("Returning to the section list...");
		for attempt in 1..=2 {
			if let Err(e) = self.ui.back().await {
				elog!("Back navigation failed: {e}");
				return false;
			}
			self.ui.settle().await;
			if self.on_list().await {
				self.state = TraversalState::Returned;
				return true;
			}
			debug!("not on the section list after back #{attempt}");
		}
		elog!("Could not confirm the section list after going back twice");
		false
	}

	async fn on_list(&self) -> bool {
		let pattern = &self.ui.table().class_page_pattern;
		self.ui.is_present(Role::SectionRow, self.ui.timing().probe_timeout).await || self.ui.url().await.contains(pattern.as_str())
	}
}
