//! Addressing table: logical roles mapped to ordered lookup expressions.
//!
//! The concrete selectors are versioned external configuration. The engine only ever asks for a [`Role`]; which
//! expressions stand behind it, and in what order they are tried, is decided by the table.

use std::{collections::BTreeMap, fmt, path::Path};

use color_eyre::{Result, eyre::eyre};
use serde::{Deserialize, Serialize};

use crate::navigator::LogicalPage;

const BUILTIN: &str = include_str!("../addressing.toml");

/// One concrete way of finding an element, tagged with its addressing scheme.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Expression {
	Css(String),
	Xpath(String),
	/// Elements whose visible text contains `needle` (case-insensitive), optionally restricted to one tag.
	Text {
		needle: String,
		#[serde(default)]
		within: Option<String>,
	},
}

impl fmt::Display for Expression {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Expression::Css(s) => write!(f, "css `{s}`"),
			Expression::Xpath(s) => write!(f, "xpath `{s}`"),
			Expression::Text { needle, within: Some(tag) } => write!(f, "text `{needle}` in <{tag}>"),
			Expression::Text { needle, within: None } => write!(f, "text `{needle}`"),
		}
	}
}

/// Every logical element the engine knows how to ask for.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	SignInMenu,
	StudentSignIn,
	UsernameField,
	AdvanceButton,
	PasswordField,
	ConnectButton,
	LoginLandmark,
	CatalogLandmark,
	CatalogEntryCard,
	ClassCard,
	ClassTitle,
	ClassSubtitle,
	ClassBody,
	TakeClassButton,
	SectionRow,
	SectionTitle,
	SectionBadge,
	ContinueButton,
	AssessmentEntry,
	StartQuiz,
	QuestionContainer,
	QuestionPrompt,
	ChoiceControl,
	ProgressLabel,
	NextQuestion,
	SubmitAnswer,
	CompleteAssessment,
	ModalContainer,
	BlockingOverlay,
}

impl Role {
	pub const ALL: [Role; 29] = [
		Role::SignInMenu,
		Role::StudentSignIn,
		Role::UsernameField,
		Role::AdvanceButton,
		Role::PasswordField,
		Role::ConnectButton,
		Role::LoginLandmark,
		Role::CatalogLandmark,
		Role::CatalogEntryCard,
		Role::ClassCard,
		Role::ClassTitle,
		Role::ClassSubtitle,
		Role::ClassBody,
		Role::TakeClassButton,
		Role::SectionRow,
		Role::SectionTitle,
		Role::SectionBadge,
		Role::ContinueButton,
		Role::AssessmentEntry,
		Role::StartQuiz,
		Role::QuestionContainer,
		Role::QuestionPrompt,
		Role::ChoiceControl,
		Role::ProgressLabel,
		Role::NextQuestion,
		Role::SubmitAnswer,
		Role::CompleteAssessment,
		Role::ModalContainer,
		Role::BlockingOverlay,
	];

	pub fn name(&self) -> &'static str {
		match self {
			Role::SignInMenu => "sign_in_menu",
			Role::StudentSignIn => "student_sign_in",
			Role::UsernameField => "username_field",
			Role::AdvanceButton => "advance_button",
			Role::PasswordField => "password_field",
			Role::ConnectButton => "connect_button",
			Role::LoginLandmark => "login_landmark",
			Role::CatalogLandmark => "catalog_landmark",
			Role::CatalogEntryCard => "catalog_entry_card",
			Role::ClassCard => "class_card",
			Role::ClassTitle => "class_title",
			Role::ClassSubtitle => "class_subtitle",
			Role::ClassBody => "class_body",
			Role::TakeClassButton => "take_class_button",
			Role::SectionRow => "section_row",
			Role::SectionTitle => "section_title",
			Role::SectionBadge => "section_badge",
			Role::ContinueButton => "continue_button",
			Role::AssessmentEntry => "assessment_entry",
			Role::StartQuiz => "start_quiz",
			Role::QuestionContainer => "question_container",
			Role::QuestionPrompt => "question_prompt",
			Role::ChoiceControl => "choice_control",
			Role::ProgressLabel => "progress_label",
			Role::NextQuestion => "next_question",
			Role::SubmitAnswer => "submit_answer",
			Role::CompleteAssessment => "complete_assessment",
			Role::ModalContainer => "modal_container",
			Role::BlockingOverlay => "blocking_overlay",
		}
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// A named, ordered list of expressions. Immutable once loaded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogicalLocator {
	pub name: String,
	pub expressions: Vec<Expression>,
}

impl LogicalLocator {
	pub fn new(name: impl Into<String>, expressions: Vec<Expression>) -> Self {
		Self { name: name.into(), expressions }
	}
}

/// Where a logical page lives and how to recognise that we are on it.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PageAddress {
	pub url: String,
	/// Substring of the address that identifies the page.
	pub pattern: String,
	#[serde(default)]
	pub landmark: Option<Role>,
	/// Card to click as the last-resort navigation tactic.
	#[serde(default)]
	pub entry_card: Option<Role>,
}

#[derive(Deserialize)]
struct RawTable {
	version: String,
	#[serde(default)]
	denylist: Vec<String>,
	class_page_pattern: String,
	results_pattern: String,
	pages: BTreeMap<LogicalPage, PageAddress>,
	locators: BTreeMap<Role, Vec<Expression>>,
}

#[derive(Clone, Debug)]
pub struct AddressingTable {
	pub version: String,
	/// Section captions that are not content rows (matched as case-insensitive substrings).
	pub denylist: Vec<String>,
	pub class_page_pattern: String,
	pub results_pattern: String,
	pages: BTreeMap<LogicalPage, PageAddress>,
	locators: BTreeMap<Role, LogicalLocator>,
}

impl AddressingTable {
	pub fn builtin() -> Result<Self> {
		Self::from_toml(BUILTIN)
	}

	pub fn load(path: &Path) -> Result<Self> {
		let text = std::fs::read_to_string(path).map_err(|e| eyre!("Failed to read addressing table {}: {e}", path.display()))?;
		Self::from_toml(&text)
	}

	pub fn from_toml(text: &str) -> Result<Self> {
		let raw: RawTable = toml::from_str(text).map_err(|e| eyre!("Invalid addressing table: {e}"))?;

		let missing: Vec<&str> = Role::ALL.iter().filter(|r| raw.locators.get(r).is_none_or(|e| e.is_empty())).map(|r| r.name()).collect();
		if !missing.is_empty() {
			return Err(eyre!("Addressing table {} has no expressions for: {}", raw.version, missing.join(", ")));
		}
		for page in LogicalPage::ALL {
			if !raw.pages.contains_key(&page) {
				return Err(eyre!("Addressing table {} has no address for the {page} page", raw.version));
			}
		}

		let locators = raw.locators.into_iter().map(|(role, expressions)| (role, LogicalLocator::new(role.name(), expressions))).collect();
		Ok(Self {
			version: raw.version,
			denylist: raw.denylist,
			class_page_pattern: raw.class_page_pattern,
			results_pattern: raw.results_pattern,
			pages: raw.pages,
			locators,
		})
	}

	pub fn locator(&self, role: Role) -> &LogicalLocator {
		// presence of every role is checked at load time
		&self.locators[&role]
	}

	pub fn page(&self, page: LogicalPage) -> &PageAddress {
		&self.pages[&page]
	}

	/// Case-insensitive substring match against the non-content caption list.
	pub fn is_denylisted(&self, title: &str) -> bool {
		let lower = title.to_lowercase();
		self.denylist.iter().any(|d| lower.contains(&d.to_lowercase()))
	}
}
