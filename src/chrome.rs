//! [`Browser`] on top of a live Chromium page.
//!
//! Nodes are stamped with a `data-autopilot-ref` attribute the first time a query returns them; that attribute is the
//! node reference handed to the engine. A reference that no longer resolves to a connected node is reported as
//! [`BrowserError::Detached`].

use chromiumoxide::{
	Page,
	browser::{Browser as CdpBrowser, BrowserConfig},
	cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams,
	error::CdpError,
};
use color_eyre::{Result, eyre::eyre};
use futures::StreamExt;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::{
	browser::{Browser, BrowserResult, ClickMethod, NodeFacts},
	error::BrowserError,
	locator::Expression,
};

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

const STEALTH: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'languages', { get: () => ['en-US', 'en'] });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
window.chrome = window.chrome || { runtime: {} };
"#;

const DESCRIBE: &str = r#"
function stamp(el) {
	if (!el.dataset.autopilotRef) {
		window.__autopilotSeq = (window.__autopilotSeq || 0) + 1;
		el.dataset.autopilotRef = 'n' + window.__autopilotSeq;
	}
	return el.dataset.autopilotRef;
}
function describe(el) {
	stamp(el);
	const style = window.getComputedStyle(el);
	const rect = el.getBoundingClientRect();
	const cls = (n) => (typeof n.className === 'string' ? n.className : '');
	let text = (el.innerText || el.textContent || '').trim();
	if (!text && el.labels && el.labels.length) text = (el.labels[0].innerText || '').trim();
	const ancestors = [];
	for (let p = el.parentElement; p && ancestors.length < 3; p = p.parentElement) ancestors.push(cls(p));
	const siblings = el.parentElement ? Array.from(el.parentElement.children).filter((s) => s !== el) : [];
	return {
		node_ref: el.dataset.autopilotRef,
		tag: el.tagName.toLowerCase(),
		text: text,
		visible: style.display !== 'none' && style.visibility !== 'hidden' && rect.width > 0 && rect.height > 0,
		enabled: !el.disabled && el.getAttribute('aria-disabled') !== 'true',
		selected: !!el.checked || el.getAttribute('aria-checked') === 'true' || el.getAttribute('aria-selected') === 'true',
		kind: el.tagName === 'INPUT' ? (el.type || '') : (el.getAttribute('role') || ''),
		classes: Array.from(el.classList),
		ancestor_classes: ancestors,
		parent_ref: el.parentElement && el.parentElement.dataset ? stamp(el.parentElement) : null,
		sibling_texts: siblings.map((s) => (s.innerText || '').trim()).filter((t) => t.length > 0 && t.length < 200),
	};
}
"#;

const FIND_ALL: &str = r#"
function findAll(scopeRef, expr) {
	let root = document;
	if (scopeRef !== null) {
		root = document.querySelector('[data-autopilot-ref=' + JSON.stringify(scopeRef) + ']');
		if (!root) return [];
	}
	let nodes = [];
	if (expr.css !== undefined) {
		nodes = Array.from(root.querySelectorAll(expr.css));
	} else if (expr.xpath !== undefined) {
		const r = document.evaluate(expr.xpath, root, null, XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null);
		for (let i = 0; i < r.snapshotLength; i++) nodes.push(r.snapshotItem(i));
	} else if (expr.text !== undefined) {
		const needle = expr.text.needle.toLowerCase();
		const reads = (n) => (n.innerText || n.textContent || '').toLowerCase().includes(needle);
		nodes = Array.from(root.querySelectorAll(expr.text.within || '*')).filter(reads);
		if (!expr.text.within) nodes = nodes.filter((n) => !Array.from(n.children).some(reads));
	}
	return nodes.filter((n) => n.nodeType === 1).map(describe);
}
"#;

/// Hides positioned, visible elements spanning most of the viewport. Anything holding controls is left alone, since
/// that is a dialog and not a veil.
const SUPPRESS_OVERLAYS: &str = r#"
(function() {
	const vw = window.innerWidth;
	const vh = window.innerHeight;
	let count = 0;
	document.querySelectorAll('body *').forEach(function(el) {
		const style = window.getComputedStyle(el);
		if (style.position !== 'fixed' && style.position !== 'absolute') return;
		if (style.display === 'none' || style.visibility === 'hidden' || !(parseFloat(style.opacity) > 0)) return;
		const rect = el.getBoundingClientRect();
		if (rect.width < vw * 0.8 || rect.height < vh * 0.8) return;
		if (el.querySelector('button, input, select, textarea, a[href]')) return;
		el.style.display = 'none';
		el.style.pointerEvents = 'none';
		count++;
	});
	return JSON.stringify(count);
})()
"#;

/// Body for [`ChromeBrowser::on_node`]: what a pointer click at the node's centre would hit.
const HIT_TEST: &str = r#"
	const rect = el.getBoundingClientRect();
	const hit = document.elementFromPoint(rect.left + rect.width / 2, rect.top + rect.height / 2);
	const reaches = !!hit && (hit === el || el.contains(hit) || (hit.tagName === 'LABEL' && hit.control === el));
	const cls = hit && typeof hit.className === 'string' ? hit.className.trim() : '';
	return { reaches: reaches, covered_by: hit ? hit.tagName.toLowerCase() + (cls ? '.' + cls.split(/\s+/).join('.') : '') : 'nothing' };
"#;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Reply {
	detached: bool,
	ok: Value,
}

/// Pointer events report success even when something else on top swallows them, so the target is hit-tested first.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct HitProbe {
	reaches: bool,
	covered_by: String,
}

impl HitProbe {
	fn check(self, node: &str) -> BrowserResult<()> {
		if self.reaches {
			return Ok(());
		}
		debug!("native click on {node} would land on {}", self.covered_by);
		Err(BrowserError::ClickIntercepted(node.to_string()))
	}
}

/// Session loss is a protocol error; anything the page itself rejected is a script error.
fn classify(e: CdpError) -> BrowserError {
	match e {
		CdpError::Ws(_) | CdpError::Io(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse => BrowserError::Protocol(e.to_string()),
		e => BrowserError::Script(e.to_string()),
	}
}

fn selector(node: &str) -> String {
	format!("[data-autopilot-ref=\"{node}\"]")
}

fn js_str(s: &str) -> String {
	serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

pub struct ChromeBrowser {
	browser: CdpBrowser,
	page: Page,
	handler: JoinHandle<()>,
}

impl ChromeBrowser {
	pub async fn launch(visible: bool) -> Result<Self> {
		let builder = BrowserConfig::builder().args(vec![
			"--no-sandbox".to_string(),
			"--disable-dev-shm-usage".to_string(),
			"--disable-blink-features=AutomationControlled".to_string(),
			format!("--user-agent={USER_AGENT}"),
		]);
		let builder = if visible { builder.with_head() } else { builder };
		let config = builder.build().map_err(|e| eyre!("Failed to build browser config: {}", e))?;

		let (browser, mut handler) = CdpBrowser::launch(config).await.map_err(|e| eyre!("Failed to launch browser: {}", e))?;
		// Events must be drained or the browser hangs.
		let handler = tokio::spawn(async move {
			while let Some(event) = handler.next().await {
				if let Err(e) = event {
					trace!("browser handler: {e}");
				}
			}
		});

		let page = browser.new_page("about:blank").await.map_err(|e| eyre!("Failed to create new page: {}", e))?;
		page.execute(AddScriptToEvaluateOnNewDocumentParams::new(STEALTH))
			.await
			.map_err(|e| eyre!("Failed to install page script: {}", e))?;

		Ok(Self { browser, page, handler })
	}

	pub async fn close(mut self) -> Result<()> {
		self.browser.close().await.map_err(|e| eyre!("Failed to close browser: {}", e))?;
		self.handler.abort();
		Ok(())
	}

	async fn eval<T: DeserializeOwned>(&self, script: String) -> BrowserResult<T> {
		let result = self.page.evaluate(script).await.map_err(classify)?;
		let json_str = result.value().and_then(|v| v.as_str()).unwrap_or("null");
		serde_json::from_str(json_str).map_err(|e| BrowserError::Script(format!("unexpected script result: {e}")))
	}

	/// Run `body` with `el` bound to the referenced node. `body` must `return` a JSON-serialisable value (or nothing).
	async fn on_node<T: DeserializeOwned>(&self, node: &str, body: &str) -> BrowserResult<T> {
		let script = format!(
			r#"(function() {{
				const el = document.querySelector({sel});
				if (!el || !el.isConnected) return JSON.stringify({{ detached: true }});
				const ok = (function(el) {{ {body} }})(el);
				return JSON.stringify({{ ok: ok === undefined ? null : ok }});
			}})()"#,
			sel = js_str(&selector(node)),
		);
		let reply: Reply = self.eval(script).await?;
		if reply.detached {
			return Err(BrowserError::Detached(node.to_string()));
		}
		serde_json::from_value(reply.ok).map_err(|e| BrowserError::Script(format!("unexpected script result: {e}")))
	}

	async fn element(&self, node: &str) -> BrowserResult<chromiumoxide::Element> {
		self.page.find_element(selector(node)).await.map_err(|e| match e {
			CdpError::Ws(_) | CdpError::Io(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse => classify(e),
			_ => BrowserError::Detached(node.to_string()),
		})
	}
}

impl Browser for ChromeBrowser {
	async fn find_all(&self, scope: Option<&str>, expr: &Expression) -> BrowserResult<Vec<NodeFacts>> {
		let expr_json = serde_json::to_string(expr).map_err(|e| BrowserError::Script(e.to_string()))?;
		let scope_json = scope.map(js_str).unwrap_or_else(|| "null".to_string());
		self.eval(format!("(function() {{ {DESCRIBE} {FIND_ALL} return JSON.stringify(findAll({scope_json}, {expr_json})); }})()")).await
	}

	async fn click(&self, node: &str, method: ClickMethod) -> BrowserResult<()> {
		match method {
			ClickMethod::Native => {
				self.on_node::<HitProbe>(node, HIT_TEST).await?.check(node)?;
				let el = self.element(node).await?;
				el.click().await.map_err(|e| {
					debug!("native click on {node}: {e}");
					BrowserError::ClickIntercepted(node.to_string())
				})?;
				Ok(())
			}
			ClickMethod::Scripted => self.on_node::<Value>(node, "el.click();").await.map(|_| ()),
			ClickMethod::Synthetic => self
				.on_node::<Value>(node, "el.dispatchEvent(new MouseEvent('click', { bubbles: true, cancelable: true, view: window }));")
				.await
				.map(|_| ()),
		}
	}

	async fn hover(&self, node: &str) -> BrowserResult<()> {
		let el = self.element(node).await?;
		el.hover().await.map_err(classify)?;
		Ok(())
	}

	async fn scroll_into_view(&self, node: &str) -> BrowserResult<()> {
		self.on_node::<Value>(node, "el.scrollIntoView({ block: 'center', inline: 'center' });").await.map(|_| ())
	}

	async fn send_keys(&self, node: &str, text: &str) -> BrowserResult<()> {
		let el = self.element(node).await?;
		el.focus().await.map_err(classify)?;
		el.type_str(text).await.map_err(classify)?;
		Ok(())
	}

	async fn clear(&self, node: &str) -> BrowserResult<()> {
		self.assign_value(node, "").await
	}

	async fn assign_value(&self, node: &str, text: &str) -> BrowserResult<()> {
		let body = format!(
			r#"const proto = el instanceof HTMLTextAreaElement ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
			const setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
			el.focus();
			setter.call(el, {value});
			el.dispatchEvent(new Event('input', {{ bubbles: true }}));
			el.dispatchEvent(new Event('change', {{ bubbles: true }}));"#,
			value = js_str(text),
		);
		self.on_node::<Value>(node, &body).await.map(|_| ())
	}

	async fn value(&self, node: &str) -> BrowserResult<String> {
		self.on_node(node, "return el.value === undefined ? '' : String(el.value);").await
	}

	async fn attribute(&self, node: &str, name: &str) -> BrowserResult<Option<String>> {
		self.on_node(node, &format!("return el.getAttribute({});", js_str(name))).await
	}

	async fn opacity(&self, node: &str) -> BrowserResult<f64> {
		self.on_node(node, "return parseFloat(window.getComputedStyle(el).opacity);").await
	}

	async fn focused(&self) -> BrowserResult<Option<NodeFacts>> {
		self.eval(format!(
			"(function() {{ {DESCRIBE} const el = document.activeElement; return JSON.stringify(!el || el === document.body ? null : describe(el)); }})()"
		))
		.await
	}

	async fn url(&self) -> BrowserResult<String> {
		Ok(self.page.url().await.map_err(classify)?.unwrap_or_default())
	}

	async fn goto(&self, url: &str) -> BrowserResult<()> {
		self.page.goto(url).await.map_err(classify)?;
		Ok(())
	}

	async fn assign_location(&self, url: &str) -> BrowserResult<()> {
		self.eval::<Value>(format!("(function() {{ window.location.assign({}); return JSON.stringify(null); }})()", js_str(url)))
			.await?;
		if let Err(e) = self.page.wait_for_navigation().await {
			debug!("no navigation after location assignment: {e}");
		}
		Ok(())
	}

	async fn back(&self) -> BrowserResult<()> {
		self.eval::<Value>("(function() { history.back(); return JSON.stringify(null); })()".to_string()).await?;
		Ok(())
	}

	async fn body_text(&self) -> BrowserResult<String> {
		self.eval("JSON.stringify(document.body ? document.body.innerText : '')".to_string()).await
	}

	async fn document_html(&self) -> BrowserResult<String> {
		self.page.content().await.map_err(classify)
	}

	async fn suppress_overlays(&self) -> BrowserResult<usize> {
		self.eval(SUPPRESS_OVERLAYS.to_string()).await
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn covered_target_refuses_the_native_click() {
		let covered: HitProbe = serde_json::from_value(json!({ "reaches": false, "covered_by": "div.modal-backdrop" })).unwrap();
		assert!(matches!(covered.check("n4"), Err(BrowserError::ClickIntercepted(n)) if n == "n4"));

		let clear: HitProbe = serde_json::from_value(json!({ "reaches": true, "covered_by": "button" })).unwrap();
		assert!(clear.check("n4").is_ok());

		// a probe that came back empty counts as covered
		assert!(HitProbe::default().check("n4").is_err());
	}
}
