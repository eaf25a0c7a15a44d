use std::path::PathBuf;

use color_eyre::{Result, eyre::eyre};
use v_utils::{log, xdg_state_dir};

use crate::browser::Browser;

/// Persist the current document under the session's state directory, for looking at what went wrong afterwards.
pub async fn save_page_html<B: Browser>(browser: &B, session_id: &str) -> Result<PathBuf> {
	let html_dir = xdg_state_dir!("persist_htmls").join(session_id);
	std::fs::create_dir_all(&html_dir).map_err(|e| eyre!("Failed to create HTML dir: {}", e))?;

	let url = browser.url().await.unwrap_or_default();
	let html = browser.document_html().await.map_err(|e| eyre!("Failed to get page HTML: {}", e))?;

	let filepath = html_dir.join(file_name(&url, chrono::Utc::now().timestamp()));
	std::fs::write(&filepath, html).map_err(|e| eyre!("Failed to write HTML file: {}", e))?;

	log!("Saved page HTML to: {}", filepath.display());
	Ok(filepath)
}

fn file_name(url: &str, timestamp: i64) -> String {
	let label = url.replace("https://", "").replace("http://", "");
	let safe_label: String = label.chars().map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' }).collect();
	format!("{timestamp}_{safe_label}.html")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn file_names_are_path_safe() {
		assert_eq!(file_name("https://apex.example.com/ords/f?p=100:7", 1700000000), "1700000000_apex_example_com_ords_f_p_100_7.html");
	}
}
