//! Classes on the catalog page and the ordered sections inside a class.

use std::{fmt, time::Duration};

use tracing::debug;
use v_utils::{elog, log};

use crate::{
	browser::{Browser, NodeFacts},
	interaction::Interaction,
	locator::Role,
	navigator::{LogicalPage, SessionNavigator},
	resolver::ResolvedElement,
};

/// One class card. Handles are only good until the next state-changing interaction.
#[derive(Clone, Debug)]
pub struct ClassRecord {
	pub ordinal: usize,
	pub title: String,
	pub subtitle: String,
	pub body: String,
	pub card: ResolvedElement,
	/// The "Take Class" control, if the card has one.
	pub action: Option<ResolvedElement>,
}

impl ClassRecord {
	pub fn usable(&self) -> bool {
		self.action.is_some()
	}
}

impl fmt::Display for ClassRecord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}. {}", self.ordinal, self.title)?;
		if !self.subtitle.is_empty() {
			write!(f, "\n   {}", self.subtitle)?;
		}
		if !self.body.is_empty() {
			let preview: String = self.body.chars().take(100).collect();
			let ellipsis = if preview.len() < self.body.len() { "..." } else { "" };
			write!(f, "\n   {preview}{ellipsis}")?;
		}
		if !self.usable() {
			write!(f, "\n   (no Take Class button)")?;
		}
		Ok(())
	}
}

/// Independent completion heuristics for a section row. Any one of them marks the row complete.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CompletionSignals {
	/// Row text shows "100%".
	pub text_full: bool,
	/// A badge inside the row shows "100%".
	pub badge_full: bool,
	pub ancestor_complete: bool,
	/// A badge next to the row (same parent) says complete, by class or by text.
	pub sibling_complete: bool,
	pub own_complete: bool,
}

fn marks_complete(class_attr: &str) -> bool {
	let lower = class_attr.to_lowercase();
	lower.contains("complete") && !lower.contains("incomplete")
}

fn reads_complete(text: &str) -> bool {
	let lower = text.trim().to_lowercase();
	lower.contains("100%") || (lower.contains("complete") && !lower.contains("incomplete"))
}

impl CompletionSignals {
	/// Pure over one snapshot of the row, so a single enumeration can never disagree with itself.
	/// `badges` sit inside the row, `sibling_badges` next to it. Other rows are never passed as siblings.
	pub fn evaluate(row: &NodeFacts, badges: &[NodeFacts], sibling_badges: &[NodeFacts]) -> Self {
		Self {
			text_full: row.text.contains("100%"),
			badge_full: badges.iter().any(|b| b.text.contains("100%")),
			ancestor_complete: row.ancestor_classes.iter().any(|c| marks_complete(c)),
			sibling_complete: sibling_badges.iter().any(|b| marks_complete(&b.classes.join(" ")) || reads_complete(&b.text)),
			own_complete: marks_complete(&row.classes.join(" ")),
		}
	}

	pub fn any(&self) -> bool {
		self.text_full || self.badge_full || self.ancestor_complete || self.sibling_complete || self.own_complete
	}
}

#[derive(Clone, Debug, PartialEq)]
pub struct SectionRecord {
	/// 1-based, counting only content rows.
	pub ordinal: usize,
	pub title: String,
	pub is_complete: bool,
	pub signals: CompletionSignals,
}

impl fmt::Display for SectionRecord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let status = if self.is_complete { "✓ Complete" } else { "○ Pending" };
		write!(f, "{}. {} [{status}]", self.ordinal, self.title)
	}
}

pub struct ClassCatalog<'a, B: Browser> {
	ui: &'a Interaction<B>,
	nav: SessionNavigator<'a, B>,
}

impl<'a, B: Browser> ClassCatalog<'a, B> {
	pub fn new(ui: &'a Interaction<B>) -> Self {
		Self { ui, nav: SessionNavigator::new(ui) }
	}

	async fn title_of(&self, card: &ResolvedElement) -> String {
		if let Some(el) = self.ui.find_in(Role::ClassTitle, card, Duration::ZERO).await {
			let title = el.text().trim();
			if !title.is_empty() {
				return title.to_string();
			}
		}
		card.first_line().unwrap_or("Untitled").to_string()
	}

	async fn text_in(&self, role: Role, card: &ResolvedElement) -> String {
		match self.ui.find_in(role, card, Duration::ZERO).await {
			Some(el) => el.text().trim().to_string(),
			None => String::new(),
		}
	}

	/// Every class card on the catalog page. Empty when the catalog can't be reached.
	pub async fn enumerate(&self) -> Vec<ClassRecord> {
		let timing = self.ui.timing();
		if !self.ui.is_present(Role::CatalogLandmark, timing.probe_timeout).await {
			debug!("catalog landmark absent, navigating");
			if let Err(e) = self.nav.reach(LogicalPage::Catalog).await {
				elog!("Could not reach the class catalog: {e}");
				return Vec::new();
			}
		}

		let cards = self.ui.collect(Role::ClassCard, timing.resolve_timeout).await;
		log!("Found {} class(es)", cards.len());

		let mut classes = Vec::with_capacity(cards.len());
		for (i, card) in cards.into_iter().enumerate() {
			let title = self.title_of(&card).await;
			let subtitle = self.text_in(Role::ClassSubtitle, &card).await;
			let body = self.text_in(Role::ClassBody, &card).await;
			let action = self.ui.find_in(Role::TakeClassButton, &card, Duration::ZERO).await;
			if action.is_none() {
				elog!("No 'Take Class' button on '{title}', it may not be a real class");
			}
			classes.push(ClassRecord {
				ordinal: i + 1,
				title,
				subtitle,
				body,
				card,
				action,
			});
		}
		classes
	}

	/// Open a class. The card is looked up again by ordinal, then by title, so a record from an earlier listing works.
	pub async fn select_class(&self, record: &ClassRecord) -> bool {
		let timing = self.ui.timing();
		let cards = self.ui.collect(Role::ClassCard, timing.resolve_timeout).await;

		let mut titles = Vec::with_capacity(cards.len());
		for card in &cards {
			titles.push(self.title_of(card).await);
		}
		let idx = match record.ordinal.checked_sub(1) {
			Some(i) if titles.get(i).is_some_and(|t| *t == record.title) => Some(i),
			_ => titles.iter().position(|t| *t == record.title),
		};
		let Some(card) = idx.map(|i| &cards[i]) else {
			elog!("Class '{}' is no longer listed", record.title);
			return false;
		};

		let Some(action) = self.ui.find_in(Role::TakeClassButton, card, Duration::ZERO).await else {
			elog!("No 'Take Class' button for '{}'", record.title);
			return false;
		};
		log!("Opening class: {}", record.title);
		if let Err(e) = self.ui.click(&action).await {
			elog!("Failed to open '{}': {e}", record.title);
			return false;
		}
		self.ui.settle().await;
		if !self.ui.is_present(Role::SectionRow, timing.resolve_timeout).await {
			elog!("Class page for '{}' did not show any sections yet, continuing", record.title);
		}
		true
	}

	/// Section rows that carry content, with their 1-based filtered ordinal and title.
	pub(crate) async fn content_rows(&self) -> Vec<(usize, String, ResolvedElement)> {
		let rows = self.ui.collect(Role::SectionRow, self.ui.timing().resolve_timeout).await;

		let mut kept = Vec::new();
		for row in rows {
			let title = match self.ui.find_in(Role::SectionTitle, &row, Duration::ZERO).await {
				Some(el) if !el.text().trim().is_empty() => el.text().trim().to_string(),
				_ => row.first_line().unwrap_or_default().to_string(),
			};
			if title.is_empty() || self.ui.table().is_denylisted(&title) {
				debug!("skipping non-content row {title:?}");
				continue;
			}
			kept.push((kept.len() + 1, title, row));
		}
		kept
	}

	/// Content sections of the open class, numbered 1..=K after dropping non-content rows.
	pub async fn sections(&self) -> Vec<SectionRecord> {
		let mut sections = Vec::new();
		for (ordinal, title, row) in self.content_rows().await {
			let badges: Vec<NodeFacts> = self.ui.collect_in(Role::SectionBadge, &row, Duration::ZERO).await.into_iter().map(|b| b.facts).collect();
			let sibling_badges: Vec<NodeFacts> = self.ui.collect_siblings(Role::SectionBadge, &row).await.into_iter().map(|b| b.facts).collect();
			let signals = CompletionSignals::evaluate(&row.facts, &badges, &sibling_badges);
			sections.push(SectionRecord {
				ordinal,
				title,
				is_complete: signals.any(),
				signals,
			});
		}
		sections
	}

	pub async fn sections_of(&self, record: &ClassRecord) -> Vec<SectionRecord> {
		if !self.select_class(record).await {
			return Vec::new();
		}
		self.sections().await
	}
}
