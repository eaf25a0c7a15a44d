//! Scripted in-memory browser for tests.
//!
//! Pages are keyed by URL and hold flat node lists; a node matches a query when its `matches` list contains the
//! queried expression verbatim. Click effects model just enough of the site to drive the state machines.

use std::{cell::RefCell, collections::HashMap, time::Duration};

use crate::{
	browser::{Browser, BrowserResult, ClickMethod, NodeFacts},
	error::BrowserError,
	locator::{AddressingTable, Expression},
};

pub(crate) fn css(s: &str) -> Expression {
	Expression::Css(s.into())
}

pub(crate) fn xpath(s: &str) -> Expression {
	Expression::Xpath(s.into())
}

#[derive(Clone, Debug)]
pub(crate) enum Effect {
	Goto(String),
	Toggle,
	/// Select this node and deselect every other node with the same parent.
	SelectExclusive,
	AddClass { url: String, node: String, class: String },
	Attach(String),
	/// Detaching a node takes its whole subtree out of the document.
	Detach(String),
	Record(String),
}

#[derive(Clone, Debug)]
pub(crate) struct FakeNode {
	pub id: String,
	pub parent: Option<String>,
	pub matches: Vec<Expression>,
	pub facts: NodeFacts,
	pub attached: bool,
	pub value: String,
	pub attributes: HashMap<String, String>,
	pub opacity: f64,
	pub effects: Vec<Effect>,
	pub native_click_fails: bool,
	pub rejects_keys: bool,
	pub overlay: bool,
}

impl FakeNode {
	pub fn new(id: &str) -> Self {
		Self {
			id: id.into(),
			parent: None,
			matches: Vec::new(),
			facts: NodeFacts {
				node_ref: id.into(),
				tag: "div".into(),
				visible: true,
				enabled: true,
				..Default::default()
			},
			attached: true,
			value: String::new(),
			attributes: HashMap::new(),
			opacity: 1.0,
			effects: Vec::new(),
			native_click_fails: false,
			rejects_keys: false,
			overlay: false,
		}
	}

	pub fn matching(mut self, expr: Expression) -> Self {
		self.matches.push(expr);
		self
	}

	pub fn within(mut self, parent: &str) -> Self {
		self.parent = Some(parent.into());
		self.facts.parent_ref = Some(parent.into());
		self
	}

	pub fn text(mut self, text: &str) -> Self {
		self.facts.text = text.into();
		self
	}

	pub fn tag(mut self, tag: &str) -> Self {
		self.facts.tag = tag.into();
		self
	}

	pub fn kind(mut self, kind: &str) -> Self {
		self.facts.kind = kind.into();
		self
	}

	pub fn classes(mut self, classes: &[&str]) -> Self {
		self.facts.classes = classes.iter().map(|c| c.to_string()).collect();
		self
	}

	/// Text of a neighbouring element, such as the label next to an input.
	pub fn sibling(mut self, text: &str) -> Self {
		self.facts.sibling_texts.push(text.into());
		self
	}

	pub fn hidden(mut self) -> Self {
		self.facts.visible = false;
		self
	}

	pub fn detached(mut self) -> Self {
		self.attached = false;
		self
	}

	pub fn attr(mut self, name: &str, value: &str) -> Self {
		self.attributes.insert(name.into(), value.into());
		self
	}

	pub fn opacity(mut self, opacity: f64) -> Self {
		self.opacity = opacity;
		self
	}

	pub fn overlay(mut self) -> Self {
		self.overlay = true;
		self
	}

	pub fn native_click_fails(mut self) -> Self {
		self.native_click_fails = true;
		self
	}

	pub fn rejects_keys(mut self) -> Self {
		self.rejects_keys = true;
		self
	}

	pub fn on_click(mut self, effect: Effect) -> Self {
		self.effects.push(effect);
		self
	}
}

#[derive(Debug, Default)]
struct Site {
	url: String,
	pages: HashMap<String, Vec<FakeNode>>,
	history: Vec<String>,
	focused: Option<String>,
	clicks: Vec<(String, ClickMethod)>,
	records: Vec<String>,
	redirects: HashMap<String, String>,
	/// How long every lookup takes to answer.
	lookup_delay: Duration,
}

impl Site {
	fn navigate(&mut self, url: &str) {
		let previous = std::mem::replace(&mut self.url, url.to_string());
		self.history.push(previous);
		self.pages.entry(url.to_string()).or_default();
	}

	/// Attached, and so is every ancestor.
	fn is_live(nodes: &[FakeNode], node: &FakeNode) -> bool {
		let mut current = Some(node);
		while let Some(n) = current {
			if !n.attached {
				return false;
			}
			current = n.parent.as_deref().and_then(|p| nodes.iter().find(|c| c.id == p));
		}
		true
	}

	fn node_mut(&mut self, id: &str) -> BrowserResult<&mut FakeNode> {
		let nodes = self.pages.get_mut(&self.url).ok_or_else(|| BrowserError::Detached(id.to_string()))?;
		let idx = nodes.iter().position(|n| n.id == id && Self::is_live(nodes, n)).ok_or_else(|| BrowserError::Detached(id.to_string()))?;
		Ok(&mut nodes[idx])
	}

	fn node(&self, id: &str) -> BrowserResult<&FakeNode> {
		self.pages
			.get(&self.url)
			.and_then(|nodes| nodes.iter().find(|n| n.id == id && Self::is_live(nodes, n)))
			.ok_or_else(|| BrowserError::Detached(id.to_string()))
	}

	fn is_descendant(nodes: &[FakeNode], node: &FakeNode, ancestor: &str) -> bool {
		let mut parent = node.parent.as_deref();
		while let Some(p) = parent {
			if p == ancestor {
				return true;
			}
			parent = nodes.iter().find(|n| n.id == p).and_then(|n| n.parent.as_deref());
		}
		false
	}

	fn apply(&mut self, id: &str, effect: Effect) {
		match effect {
			Effect::Goto(url) => self.navigate(&url),
			Effect::Toggle =>
				if let Ok(node) = self.node_mut(id) {
					node.facts.selected = !node.facts.selected;
				},
			Effect::SelectExclusive => {
				let parent = self.node(id).ok().and_then(|n| n.parent.clone());
				if let Some(nodes) = self.pages.get_mut(&self.url) {
					for n in nodes.iter_mut().filter(|n| n.parent == parent) {
						n.facts.selected = n.id == id;
					}
				}
			}
			Effect::AddClass { url, node, class } =>
				if let Some(n) = self.pages.get_mut(&url).and_then(|nodes| nodes.iter_mut().find(|n| n.id == node)) {
					n.facts.classes.push(class);
				},
			Effect::Attach(node) =>
				if let Some(n) = self.pages.get_mut(&self.url).and_then(|nodes| nodes.iter_mut().find(|n| n.id == node)) {
					n.attached = true;
				},
			Effect::Detach(node) =>
				if let Some(n) = self.pages.get_mut(&self.url).and_then(|nodes| nodes.iter_mut().find(|n| n.id == node)) {
					n.attached = false;
				},
			Effect::Record(label) => self.records.push(label),
		}
	}
}

#[derive(Debug)]
pub(crate) struct FakeBrowser {
	site: RefCell<Site>,
}

impl FakeBrowser {
	pub fn new(start_url: &str) -> Self {
		let mut site = Site { url: start_url.into(), ..Default::default() };
		site.pages.entry(start_url.into()).or_default();
		Self { site: RefCell::new(site) }
	}

	pub fn with_page(self, url: &str, nodes: Vec<FakeNode>) -> Self {
		self.site.borrow_mut().pages.insert(url.into(), nodes);
		self
	}

	pub fn with_lookup_delay(self, delay: Duration) -> Self {
		self.site.borrow_mut().lookup_delay = delay;
		self
	}

	/// Address navigation to `from` lands on `to` instead. Click effects are not redirected.
	pub fn with_redirect(self, from: &str, to: &str) -> Self {
		self.site.borrow_mut().redirects.insert(from.into(), to.into());
		self
	}

	pub fn with_focus(self, node: &str) -> Self {
		self.site.borrow_mut().focused = Some(node.into());
		self
	}

	pub fn current_url(&self) -> String {
		self.site.borrow().url.clone()
	}

	pub fn clicks(&self) -> Vec<(String, ClickMethod)> {
		self.site.borrow().clicks.clone()
	}

	pub fn clicked(&self, id: &str) -> usize {
		self.site.borrow().clicks.iter().filter(|(n, _)| n == id).count()
	}

	pub fn records(&self) -> Vec<String> {
		self.site.borrow().records.clone()
	}

	/// Inspect a node on any page.
	pub fn inspect(&self, url: &str, id: &str) -> FakeNode {
		self.site.borrow().pages[url].iter().find(|n| n.id == id).cloned().unwrap_or_else(|| panic!("no node {id} on {url}"))
	}
}

impl Browser for FakeBrowser {
	async fn find_all(&self, scope: Option<&str>, expr: &Expression) -> BrowserResult<Vec<NodeFacts>> {
		let delay = self.site.borrow().lookup_delay;
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}
		let site = self.site.borrow();
		let Some(nodes) = site.pages.get(&site.url) else {
			return Ok(Vec::new());
		};
		Ok(nodes
			.iter()
			.filter(|n| n.matches.contains(expr) && Site::is_live(nodes, n))
			.filter(|n| scope.is_none_or(|s| Site::is_descendant(nodes, n, s)))
			.map(|n| n.facts.clone())
			.collect())
	}

	async fn click(&self, node: &str, method: ClickMethod) -> BrowserResult<()> {
		let mut site = self.site.borrow_mut();
		let target = site.node(node)?;
		if method == ClickMethod::Native && target.native_click_fails {
			return Err(BrowserError::ClickIntercepted(node.to_string()));
		}
		let effects = target.effects.clone();
		site.clicks.push((node.to_string(), method));
		site.focused = Some(node.to_string());
		for effect in effects {
			site.apply(node, effect);
		}
		Ok(())
	}

	async fn hover(&self, node: &str) -> BrowserResult<()> {
		self.site.borrow().node(node).map(|_| ())
	}

	async fn scroll_into_view(&self, node: &str) -> BrowserResult<()> {
		self.site.borrow().node(node).map(|_| ())
	}

	async fn send_keys(&self, node: &str, text: &str) -> BrowserResult<()> {
		let mut site = self.site.borrow_mut();
		let n = site.node_mut(node)?;
		if !n.rejects_keys {
			n.value.push_str(text);
		}
		Ok(())
	}

	async fn clear(&self, node: &str) -> BrowserResult<()> {
		self.site.borrow_mut().node_mut(node)?.value.clear();
		Ok(())
	}

	async fn assign_value(&self, node: &str, text: &str) -> BrowserResult<()> {
		self.site.borrow_mut().node_mut(node)?.value = text.to_string();
		Ok(())
	}

	async fn value(&self, node: &str) -> BrowserResult<String> {
		Ok(self.site.borrow().node(node)?.value.clone())
	}

	async fn attribute(&self, node: &str, name: &str) -> BrowserResult<Option<String>> {
		Ok(self.site.borrow().node(node)?.attributes.get(name).cloned())
	}

	async fn opacity(&self, node: &str) -> BrowserResult<f64> {
		Ok(self.site.borrow().node(node)?.opacity)
	}

	async fn focused(&self) -> BrowserResult<Option<NodeFacts>> {
		let site = self.site.borrow();
		Ok(site.focused.as_deref().and_then(|id| site.node(id).ok()).map(|n| n.facts.clone()))
	}

	async fn url(&self) -> BrowserResult<String> {
		Ok(self.current_url())
	}

	async fn goto(&self, url: &str) -> BrowserResult<()> {
		let mut site = self.site.borrow_mut();
		let target = site.redirects.get(url).cloned().unwrap_or_else(|| url.to_string());
		site.navigate(&target);
		Ok(())
	}

	async fn assign_location(&self, url: &str) -> BrowserResult<()> {
		self.goto(url).await
	}

	async fn back(&self) -> BrowserResult<()> {
		let mut site = self.site.borrow_mut();
		if let Some(previous) = site.history.pop() {
			site.url = previous;
		}
		Ok(())
	}

	async fn body_text(&self) -> BrowserResult<String> {
		let site = self.site.borrow();
		let text: Vec<String> = site
			.pages
			.get(&site.url)
			.map(|nodes| nodes.iter().filter(|n| n.facts.visible && Site::is_live(nodes, n)).map(|n| n.facts.text.clone()).collect())
			.unwrap_or_default();
		Ok(text.join("\n"))
	}

	async fn document_html(&self) -> BrowserResult<String> {
		Ok(format!("<html><body>{}</body></html>", self.body_text().await?))
	}

	async fn suppress_overlays(&self) -> BrowserResult<usize> {
		let mut site = self.site.borrow_mut();
		let url = site.url.clone();
		let Some(nodes) = site.pages.get_mut(&url) else {
			return Ok(0);
		};
		let targets: Vec<usize> = (0..nodes.len()).filter(|&i| nodes[i].overlay && nodes[i].facts.visible && Site::is_live(nodes, &nodes[i])).collect();
		for &i in &targets {
			nodes[i].facts.visible = false;
		}
		Ok(targets.len())
	}
}

/// Addressing table where every role maps to a single css expression named after the role (`.role_name`).
/// Roles listed in `extra` get additional expressions appended after the primary one.
pub(crate) fn test_table(extra: &[(&str, &str)]) -> AddressingTable {
	let mut text = String::from(
		r#"
		version = "test"
		class_page_pattern = "/class"
		results_pattern = "/results"
		denylist = ["course resources"]
		[pages.landing]
		url = "https://site/landing"
		pattern = "/landing"
		landmark = "sign_in_menu"
		[pages.sign_in]
		url = "https://site/signin"
		pattern = "signin"
		landmark = "username_field"
		[pages.catalog]
		url = "https://site/catalog"
		pattern = "/catalog"
		landmark = "catalog_landmark"
		entry_card = "catalog_entry_card"
		[locators]
		"#,
	);
	for role in crate::locator::Role::ALL {
		let name = role.name();
		let mut exprs = vec![format!("{{ css = \".{name}\" }}")];
		for (r, e) in extra {
			if *r == name {
				exprs.push(format!("{{ css = \"{e}\" }}"));
			}
		}
		text.push_str(&format!("{name} = [{}]\n", exprs.join(", ")));
	}
	AddressingTable::from_toml(&text).expect("test table parses")
}

/// The css expression [`test_table`] uses for a role.
pub(crate) fn role_css(role: crate::locator::Role) -> Expression {
	Expression::Css(format!(".{}", role.name()))
}
