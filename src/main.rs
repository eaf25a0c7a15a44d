use std::path::PathBuf;

use clap::Parser;
use color_eyre::{Result, eyre::eyre};
use course_autopilot::{
	browser::Browser,
	catalog::ClassCatalog,
	chrome::ChromeBrowser,
	config::{AppConfig, TOKEN_ENV},
	interaction::Interaction,
	llm::{ConfiguredOracle, FirstChoiceOracle, LlmOracle},
	locator::AddressingTable,
	login::{AuthStep, AuthenticationFlow, Credentials},
	runner::{ProgressOrchestrator, TraversalCursor},
};
use inquire::{CustomType, Password, PasswordDisplayMode, Text};
use tracing_subscriber::EnvFilter;
use v_utils::{elog, log};

#[derive(Debug, Parser)]
#[command(name = "course_autopilot")]
#[command(about = "Signs in to the learning platform and works through pending course sections", long_about = None)]
struct Args {
	/// Run with visible browser window (non-headless mode)
	#[arg(long)]
	visible: bool,

	/// TOML config file
	#[arg(short, long)]
	config: Option<PathBuf>,

	/// Addressing table to use instead of the builtin one
	#[arg(long)]
	addressing: Option<PathBuf>,

	/// Username for the platform login (prompted when absent)
	#[arg(short, long)]
	username: Option<String>,
}

// Single-threaded: the engine is one logical task, and the API key may be exported to the environment at startup.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
	color_eyre::install()?;
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
		.with_writer(std::io::stderr)
		.init();
	let args = Args::parse();

	let mut config = AppConfig::load(args.config.as_deref())?;
	config.visible |= args.visible;
	if args.addressing.is_some() {
		config.addressing = args.addressing;
	}
	let table = match &config.addressing {
		Some(path) => AddressingTable::load(path)?,
		None => AddressingTable::builtin()?,
	};
	log!("Addressing table {}", table.version);
	let oracle = oracle_for(&config);

	let username = match args.username.or_else(|| config.username.clone()) {
		Some(u) => u,
		None => Text::new("Username:").prompt()?,
	};
	let password = Password::new("Password:").with_display_mode(PasswordDisplayMode::Masked).without_confirmation().prompt()?;
	let credentials = Credentials::new(username, password);
	let session_id = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();

	log!("Launching browser (visible: {})...", config.visible);
	let browser = ChromeBrowser::launch(config.visible).await?;
	let ui = Interaction::new(browser, table, config.timing());

	let outcome = tokio::select! {
		r = session(&ui, &config, &oracle, &credentials, &session_id) => Some(r),
		_ = tokio::signal::ctrl_c() => {
			elog!("Interrupted, shutting down");
			None
		}
	};

	let closed = ui.into_browser().close().await;
	match &outcome {
		Some(Ok(())) => log!("{}", final_status(&session_id, outcome.as_ref())),
		_ => elog!("{}", final_status(&session_id, outcome.as_ref())),
	}
	if let Err(e) = closed {
		elog!("{e}");
	}
	outcome.unwrap_or(Ok(()))
}

/// `None` stands for a session cut short by Ctrl-C.
fn final_status(session_id: &str, outcome: Option<&Result<()>>) -> String {
	match outcome {
		Some(Ok(())) => format!("✓ Session {session_id} finished"),
		Some(Err(e)) => format!("Session {session_id} failed: {e}"),
		None => format!("Session {session_id} interrupted"),
	}
}

fn oracle_for(config: &AppConfig) -> ConfiguredOracle {
	let from_env = std::env::var(TOKEN_ENV).ok();
	let exported = from_env.is_some();
	match config.resolve_api_key(from_env) {
		Some(key) => {
			if !exported {
				// SAFETY: runs once on the only thread, before anything else reads the environment.
				unsafe { std::env::set_var(TOKEN_ENV, key) };
			}
			ConfiguredOracle::Llm(LlmOracle::new(config.api_retries, config.api_retry_delay()))
		}
		None => {
			elog!("No {TOKEN_ENV} found (env or config), every question gets its first choice");
			ConfiguredOracle::FirstChoice(FirstChoiceOracle)
		}
	}
}

async fn session<B: Browser>(ui: &Interaction<B>, config: &AppConfig, oracle: &ConfiguredOracle, credentials: &Credentials, session_id: &str) -> Result<()> {
	log!("Signing in as {}...", credentials.username);
	match AuthenticationFlow::new(ui).login(credentials).await? {
		AuthStep::Verified => log!("✓ Signed in"),
		step => elog!("Could not confirm the sign-in (reached {step}), continuing anyway"),
	}

	loop {
		log!("\n1. List classes\n2. Select a class and complete its sections\n3. Exit");
		let choice = CustomType::<u32>::new("Option:").prompt()?;
		match choice {
			1 => list_classes(ui).await,
			2 => run_class(ui, config, oracle, session_id).await?,
			3 => return Ok(()),
			_ => elog!("Pick 1, 2 or 3"),
		}
	}
}

async fn list_classes<B: Browser>(ui: &Interaction<B>) {
	let classes = ClassCatalog::new(ui).enumerate().await;
	if classes.is_empty() {
		elog!("No classes found");
		return;
	}
	log!("Found {} class(es):", classes.len());
	for class in &classes {
		log!("{class}");
	}
}

async fn run_class<B: Browser>(ui: &Interaction<B>, config: &AppConfig, oracle: &ConfiguredOracle, session_id: &str) -> Result<()> {
	let catalog = ClassCatalog::new(ui);
	let classes = catalog.enumerate().await;
	if classes.is_empty() {
		elog!("No classes found");
		return Ok(());
	}
	for class in &classes {
		log!("{class}");
	}
	let wanted = CustomType::<usize>::new("Class number:").prompt()?;
	let class = classes.iter().find(|c| c.ordinal == wanted).ok_or_else(|| eyre!("No class numbered {wanted}"))?;
	if !class.usable() {
		elog!("'{}' has no Take Class button", class.title);
		return Ok(());
	}

	let sections = catalog.sections_of(class).await;
	if sections.is_empty() {
		elog!("No sections found in '{}'", class.title);
		return Ok(());
	}
	for section in &sections {
		log!("{section}");
	}
	let first_pending = sections.iter().find(|s| !s.is_complete).map_or(1, |s| s.ordinal);
	let start = CustomType::<usize>::new("Start from section:").with_default(first_pending).prompt()?;

	let summary = ProgressOrchestrator::new(ui, oracle, config.limits(), session_id)
		.run(TraversalCursor::starting_at(class.ordinal, start))
		.await;
	log!("\n{} section(s) processed, {}", summary.processed.len(), summary.stop);
	for outcome in &summary.processed {
		log!("  {outcome}");
	}
	Ok(())
}
