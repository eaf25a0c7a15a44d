//! The browser automation surface the engine consumes.
//!
//! Everything above this trait talks in node references (opaque strings handed out by [`Browser::find_all`]);
//! nothing above it knows which automation protocol is underneath.

#![allow(async_fn_in_trait)]

use serde::{Deserialize, Serialize};

use crate::{error::BrowserError, locator::Expression};

pub type BrowserResult<T> = std::result::Result<T, BrowserError>;

/// Facts about a node, captured at query time.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct NodeFacts {
	pub node_ref: String,
	pub tag: String,
	pub text: String,
	pub visible: bool,
	pub enabled: bool,
	/// Checked / aria-checked / aria-selected.
	pub selected: bool,
	/// `type` attribute for inputs, otherwise the ARIA role.
	pub kind: String,
	pub classes: Vec<String>,
	/// Classes of the nearest few ancestors, nearest first.
	pub ancestor_classes: Vec<String>,
	/// Reference of the parent element, usable as a lookup scope.
	pub parent_ref: Option<String>,
	pub sibling_texts: Vec<String>,
}

/// How a click is delivered. Tried in [`ClickMethod::ESCALATION`] order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ClickMethod {
	/// Real pointer events through the automation protocol.
	Native,
	/// `element.click()` in page context.
	Scripted,
	/// A dispatched `MouseEvent('click')`.
	Synthetic,
}

impl ClickMethod {
	pub const ESCALATION: [ClickMethod; 3] = [ClickMethod::Native, ClickMethod::Scripted, ClickMethod::Synthetic];
}

pub trait Browser {
	/// All nodes matching `expr`, in document order, optionally scoped to a parent node.
	async fn find_all(&self, scope: Option<&str>, expr: &Expression) -> BrowserResult<Vec<NodeFacts>>;
	async fn click(&self, node: &str, method: ClickMethod) -> BrowserResult<()>;
	async fn hover(&self, node: &str) -> BrowserResult<()>;
	async fn scroll_into_view(&self, node: &str) -> BrowserResult<()>;
	/// Keystrokes into the node, as if typed.
	async fn send_keys(&self, node: &str, text: &str) -> BrowserResult<()>;
	async fn clear(&self, node: &str) -> BrowserResult<()>;
	/// Scripted value assignment followed by synthetic `input` and `change` events.
	async fn assign_value(&self, node: &str, text: &str) -> BrowserResult<()>;
	async fn value(&self, node: &str) -> BrowserResult<String>;
	async fn attribute(&self, node: &str, name: &str) -> BrowserResult<Option<String>>;
	/// Computed opacity of the node.
	async fn opacity(&self, node: &str) -> BrowserResult<f64>;
	/// The element that currently holds input focus, if any besides `<body>`.
	async fn focused(&self) -> BrowserResult<Option<NodeFacts>>;
	async fn url(&self) -> BrowserResult<String>;
	async fn goto(&self, url: &str) -> BrowserResult<()>;
	/// In-document navigation through `window.location`.
	async fn assign_location(&self, url: &str) -> BrowserResult<()>;
	async fn back(&self) -> BrowserResult<()>;
	async fn body_text(&self) -> BrowserResult<String>;
	/// Serialized `documentElement`, for post-mortem snapshots.
	async fn document_html(&self) -> BrowserResult<String>;
	/// Hides visible full-screen overlays that would intercept pointer events. Returns how many were hidden.
	async fn suppress_overlays(&self) -> BrowserResult<usize>;
}
