#![allow(async_fn_in_trait)]

use std::{sync::LazyLock, time::Duration};

use ask_llm::{Client as LlmClient, Conversation, Model, Role};
use regex::Regex;
use tracing::{debug, warn};

use crate::{OracleAnswer, QuestionRecord, error::OracleError};

/// Picks the choice ordinals to submit for a question.
pub trait AnswerOracle {
	async fn choose(&self, question: &QuestionRecord) -> Result<OracleAnswer, OracleError>;
}

/// Never fails: anything that goes wrong with the oracle becomes the first choice.
pub async fn answer_or_fallback<O: AnswerOracle>(oracle: &O, question: &QuestionRecord) -> OracleAnswer {
	match oracle.choose(question).await {
		Ok(answer) => answer,
		Err(e) => {
			warn!("{e}, falling back to the first choice");
			OracleAnswer::fallback()
		}
	}
}

static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("NUMBER is a compile-time constant"));

/// Numbers in `text` that are valid 1-based ordinals for `choice_count` choices.
/// Single mode keeps the first one; multi mode keeps all of them, deduplicated, in order of appearance.
pub fn parse_ordinals(text: &str, choice_count: usize, multiple: bool) -> Option<OracleAnswer> {
	let mut picked: Vec<usize> = Vec::new();
	for m in NUMBER.find_iter(text) {
		let Ok(n) = m.as_str().parse::<usize>() else { continue };
		if n == 0 || n > choice_count || picked.contains(&n) {
			continue;
		}
		picked.push(n);
		if !multiple {
			break;
		}
	}
	OracleAnswer::new(picked)
}

/// LLM response for single-choice questions
#[derive(Debug, serde::Deserialize)]
struct LlmSingleAnswer {
	response_number: usize,
}

/// LLM response for multi-choice questions
#[derive(Debug, serde::Deserialize)]
struct LlmMultiAnswer {
	response_numbers: Vec<usize>,
}

/// Chat-completion backed oracle.
#[derive(Clone, Debug)]
pub struct LlmOracle {
	pub retries: u32,
	/// Multiplied by the attempt number between retries.
	pub retry_delay: Duration,
}

impl LlmOracle {
	pub fn new(retries: u32, retry_delay: Duration) -> Self {
		Self { retries, retry_delay }
	}

	fn prompt(question: &QuestionRecord) -> String {
		let question_text = &question.prompt;
		let mut options_text = String::new();
		for choice in &question.choices {
			options_text.push_str(&format!("{}. {}\n", choice.ordinal, choice.text));
		}

		if question.allows_multiple {
			format!(
				r#"You are answering a multiple-choice question where MULTIPLE answers may be correct. Select ALL correct answers.

Question:
{question_text}

Options:
{options_text}
Respond with JSON only, no markdown, in this exact format:
{{"response_numbers": [<number of first correct answer>, <number of second correct answer>, ...]}}"#
			)
		} else {
			format!(
				r#"You are answering a single-choice question. Pick the ONE correct answer.

Question:
{question_text}

Options:
{options_text}
Respond with JSON only, no markdown, in this exact format:
{{"response_number": <the number of the correct answer>}}"#
			)
		}
	}

	/// Structured reply first, then any numbers in the raw text.
	fn interpret(text: &str, question: &QuestionRecord) -> Result<OracleAnswer, OracleError> {
		let n = question.choices.len();
		let json_str = text.trim();
		let structured = if question.allows_multiple {
			serde_json::from_str::<LlmMultiAnswer>(json_str).ok().map(|a| a.response_numbers)
		} else {
			serde_json::from_str::<LlmSingleAnswer>(json_str).ok().map(|a| vec![a.response_number])
		};
		if let Some(numbers) = structured {
			let mut valid: Vec<usize> = Vec::new();
			for k in numbers {
				if (1..=n).contains(&k) && !valid.contains(&k) {
					valid.push(k);
				}
			}
			if !question.allows_multiple {
				valid.truncate(1);
			}
			if let Some(answer) = OracleAnswer::new(valid) {
				return Ok(answer);
			}
		}
		parse_ordinals(json_str, n, question.allows_multiple).ok_or_else(|| OracleError::Unparseable(json_str.to_string()))
	}
}

impl AnswerOracle for LlmOracle {
	async fn choose(&self, question: &QuestionRecord) -> Result<OracleAnswer, OracleError> {
		let max_tokens = if question.allows_multiple { 64 } else { 32 };
		let prompt = Self::prompt(question);
		let mut conv = Conversation::new();
		conv.add(Role::User, prompt);

		let mut attempt = 0;
		let response = loop {
			let client = LlmClient::new().model(Model::Medium).max_tokens(max_tokens).force_json();
			match client.conversation(&conv).await {
				Ok(response) => break response,
				Err(e) if attempt < self.retries => {
					attempt += 1;
					warn!("LLM request failed (attempt {attempt}/{}): {e}", self.retries);
					tokio::time::sleep(self.retry_delay * attempt).await;
				}
				Err(e) => return Err(OracleError::Unavailable(e.to_string())),
			}
		};

		debug!("LLM raw response: {}", response.text);
		Self::interpret(&response.text, question)
	}
}

/// Always the first choice. Used when no model key is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct FirstChoiceOracle;

impl AnswerOracle for FirstChoiceOracle {
	async fn choose(&self, _question: &QuestionRecord) -> Result<OracleAnswer, OracleError> {
		Ok(OracleAnswer::fallback())
	}
}

/// The oracle picked at startup.
#[derive(Clone, Debug)]
pub enum ConfiguredOracle {
	Llm(LlmOracle),
	FirstChoice(FirstChoiceOracle),
}

impl AnswerOracle for ConfiguredOracle {
	async fn choose(&self, question: &QuestionRecord) -> Result<OracleAnswer, OracleError> {
		match self {
			ConfiguredOracle::Llm(o) => o.choose(question).await,
			ConfiguredOracle::FirstChoice(o) => o.choose(question).await,
		}
	}
}
