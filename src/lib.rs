use std::fmt;

use serde::{Deserialize, Serialize};

pub mod browser;
pub mod catalog;
pub mod chrome;
pub mod config;
pub mod error;
pub mod interaction;
pub mod llm;
pub mod locator;
pub mod login;
pub mod navigator;
pub mod quiz;
pub mod resolver;
pub mod runner;
#[cfg(feature = "xdg")]
pub mod snapshot;
pub mod termination;
pub mod traversal;

#[cfg(test)]
pub(crate) mod testing;

/// Represents a choice/option in a question
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct ChoiceRecord {
	/// 1-based position among the question's choices
	pub ordinal: usize,
	/// The text label for this choice
	pub text: String,
	/// Whether this choice is currently selected
	pub selected: bool,
}

/// One extracted quiz question
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct QuestionRecord {
	/// 1-based position within the current attempt
	pub ordinal: usize,
	pub prompt: String,
	pub choices: Vec<ChoiceRecord>,
	/// Checkbox-style question. Defaults to false when the page is ambiguous.
	pub allows_multiple: bool,
}

impl fmt::Display for QuestionRecord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "{}", self.prompt)?;
		writeln!(f)?;
		for choice in &self.choices {
			let mark = match (self.allows_multiple, choice.selected) {
				(true, true) => "[x]",
				(true, false) => "[ ]",
				(false, true) => "(*)",
				(false, false) => "( )",
			};
			writeln!(f, "{mark} {}. {}", choice.ordinal, choice.text)?;
		}
		Ok(())
	}
}

/// 1-based choice ordinals picked by an answer oracle. Never empty.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OracleAnswer(Vec<usize>);

impl OracleAnswer {
	pub fn new(ordinals: Vec<usize>) -> Option<Self> {
		if ordinals.is_empty() { None } else { Some(Self(ordinals)) }
	}

	/// The first choice.
	pub fn fallback() -> Self {
		Self(vec![1])
	}

	pub fn ordinals(&self) -> &[usize] {
		&self.0
	}

	pub fn first(&self) -> usize {
		self.0[0]
	}
}

impl fmt::Display for OracleAnswer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
		write!(f, "{}", parts.join(", "))
	}
}
