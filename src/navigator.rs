use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use v_utils::log;

use crate::{
	browser::Browser,
	error::{EngineError, EngineResult},
	interaction::Interaction,
	locator::{Expression, LogicalLocator},
};

/// Pages the engine can be asked to reach by name.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicalPage {
	Landing,
	SignIn,
	Catalog,
}

impl LogicalPage {
	pub const ALL: [LogicalPage; 3] = [LogicalPage::Landing, LogicalPage::SignIn, LogicalPage::Catalog];
}

impl fmt::Display for LogicalPage {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			LogicalPage::Landing => "landing",
			LogicalPage::SignIn => "sign-in",
			LogicalPage::Catalog => "catalog",
		};
		f.write_str(s)
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NavTactic {
	/// Click a link on the current page whose href carries the page pattern.
	InPageLink,
	DirectAddress,
	/// `window.location` assignment from page context.
	ScriptedLocation,
	/// Click the page's entry card, then look for its landmark.
	EntryCard,
}

impl NavTactic {
	pub const ORDER: [NavTactic; 4] = [NavTactic::InPageLink, NavTactic::DirectAddress, NavTactic::ScriptedLocation, NavTactic::EntryCard];

	fn name(self) -> &'static str {
		match self {
			NavTactic::InPageLink => "in-page link",
			NavTactic::DirectAddress => "direct address",
			NavTactic::ScriptedLocation => "scripted location",
			NavTactic::EntryCard => "entry card",
		}
	}
}

impl fmt::Display for NavTactic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Reached {
	AlreadyThere,
	Via(NavTactic),
}

pub struct SessionNavigator<'a, B: Browser> {
	ui: &'a Interaction<B>,
}

impl<'a, B: Browser> SessionNavigator<'a, B> {
	pub fn new(ui: &'a Interaction<B>) -> Self {
		Self { ui }
	}

	/// Page post-condition: the address carries the page pattern, or the page landmark is on screen.
	pub async fn is_on(&self, page: LogicalPage, within: Duration) -> bool {
		let ui = self.ui;
		let address = ui.table().page(page);
		ui.wait_for(within, move || async move {
			if ui.url().await.contains(&address.pattern) {
				return true;
			}
			match address.landmark {
				Some(role) => ui.is_present(role, Duration::ZERO).await,
				None => false,
			}
		})
		.await
	}

	pub async fn reach(&self, page: LogicalPage) -> EngineResult<Reached> {
		if self.is_on(page, Duration::ZERO).await {
			debug!("already on the {page} page");
			return Ok(Reached::AlreadyThere);
		}

		let mut tried = Vec::new();
		for tactic in NavTactic::ORDER {
			match self.attempt(tactic, page).await {
				Ok(false) => {
					debug!("{tactic} not applicable for the {page} page");
					continue;
				}
				Ok(true) => {}
				Err(e) => {
					warn!("{tactic} towards the {page} page failed: {e}");
					tried.push(tactic.to_string());
					continue;
				}
			}
			tried.push(tactic.to_string());

			self.ui.settle().await;
			if self.is_on(page, self.ui.timing().probe_timeout).await {
				log!("Reached the {page} page via {tactic}");
				return Ok(Reached::Via(tactic));
			}
			debug!("{tactic} did not land on the {page} page (now at {})", self.ui.url().await);
		}

		Err(EngineError::NavigationTimeout { page, tactics: tried })
	}

	/// `Ok(false)` when the tactic has nothing to act on for this page.
	async fn attempt(&self, tactic: NavTactic, page: LogicalPage) -> EngineResult<bool> {
		let address = self.ui.table().page(page);
		match tactic {
			NavTactic::InPageLink => {
				let link = LogicalLocator::new(format!("link to {page}"), vec![Expression::Xpath(format!("//a[contains(@href, '{}')]", address.pattern))]);
				let Some(el) = self.ui.find_with(&link, Duration::ZERO).await else {
					return Ok(false);
				};
				self.ui.click(&el).await?;
			}
			NavTactic::DirectAddress => self.ui.navigate(&address.url).await?,
			NavTactic::ScriptedLocation => self.ui.assign_location(&address.url).await?,
			NavTactic::EntryCard => {
				let Some(role) = address.entry_card else {
					return Ok(false);
				};
				let Some(card) = self.ui.find(role, self.ui.timing().probe_timeout).await else {
					return Ok(false);
				};
				self.ui.click(&card).await?;
			}
		}
		Ok(true)
	}
}
