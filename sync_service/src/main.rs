//! Background sync service for the ShadowZM community website.
//!
//! The game server writes player statistics into a binary `csstats.dat` file and ban
//! events into rotating `BAN_HISTORY_*.log` files. This service watches both and keeps
//! the website's MongoDB `players` and `bans` collections current: stats are re-synced
//! on a fixed interval, ban logs whenever their fingerprint changes. The website never
//! reads server files itself. It only sees these two collections, which it also
//! writes through its own webhook path, so every write here is an idempotent upsert.

#![warn(missing_debug_implementations, rust_2018_idioms)]
#![warn(clippy::style, clippy::perf, clippy::complexity, clippy::correctness)]

mod store;
mod sync;

use {
	crate::{store::Store, sync::SyncService},
	clap::Parser,
	color_eyre::Result,
	serde::Deserialize,
	std::path::PathBuf,
	time::macros::format_description,
	tracing::{info, warn},
	tracing_subscriber::{
		fmt::{format::FmtSpan, time::UtcTime},
		EnvFilter,
	},
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;
	let args = Args::parse();

	let config_file = std::fs::read_to_string(&args.config)?;
	let config: Config = toml::from_str(&config_file)?;

	let subscriber = tracing_subscriber::fmt()
		.compact()
		.with_timer(UtcTime::new(format_description!(
			"[[[year]-[month]-[day] | [hour]:[minute]:[second]]"
		)))
		.with_line_number(true)
		.with_span_events(FmtSpan::NEW)
		.with_env_filter(EnvFilter::new(if args.debug {
			"DEBUG"
		} else if let Some(ref level) = config.log_level {
			level.as_str()
		} else {
			"sync_service=INFO,shadowzm=INFO"
		}));

	let _guard = match &config.log_dir {
		Some(log_dir) => {
			let file_logger = tracing_appender::rolling::daily(log_dir, "sync_service.log");
			let (log_writer, guard) = tracing_appender::non_blocking(file_logger);
			subscriber
				.with_writer(log_writer)
				.init();
			Some(guard)
		}
		None => {
			subscriber.init();
			None
		}
	};

	info!("Loaded config from `{}`.", args.config.display());

	if !config.stats_file.exists() {
		warn!(
			"Stats file `{}` does not exist yet. The stats loop will idle until it shows up.",
			config.stats_file.display()
		);
	}

	if !config.ban_logs_dir.exists() {
		warn!(
			"Ban log directory `{}` does not exist yet. The ban loop will idle until it shows up.",
			config.ban_logs_dir.display()
		);
	}

	let store = Store::connect(&config).await?;
	let service = SyncService::new(config, store);

	if args.once {
		service.run_once().await
	} else {
		service.run().await
	}
}

/// Some convenience CLI arguments to configure the service quickly without changing
/// the config file.
#[derive(Debug, Parser)]
struct Args {
	/// The path to the service's config file.
	#[arg(short, long)]
	#[clap(default_value = "./config.toml")]
	config: PathBuf,

	/// Run a single sync pass for both feeds and exit instead of looping.
	#[arg(long)]
	#[clap(default_value = "false")]
	once: bool,

	/// Run in debug mode.
	#[arg(long)]
	#[clap(default_value = "false")]
	debug: bool,
}

/// Config file for the service. Only `mongo_url` is required; everything else has a
/// sensible default.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	/// Can be one of the following:
	/// - `TRACE`
	/// - `DEBUG`
	/// - `INFO`
	/// - `WARN`
	/// - `ERROR`
	///
	/// This value will default to `INFO`.
	/// The `--debug` flag will always override this value to `DEBUG`.
	pub log_level: Option<String>,

	/// Directory for rolling log files. Logs go to STDOUT when unset.
	pub log_dir: Option<PathBuf>,

	/// MongoDB connection string. The service refuses to start without one.
	pub mongo_url: String,

	/// Logical database holding the `players` and `bans` collections.
	#[serde(default = "defaults::database")]
	pub database: String,

	/// Path to the game server's `csstats.dat`.
	#[serde(default = "defaults::stats_file")]
	pub stats_file: PathBuf,

	/// Directory the game server writes `BAN_HISTORY_*.log` files into.
	#[serde(default = "defaults::ban_logs_dir")]
	pub ban_logs_dir: PathBuf,

	/// Seconds between stats syncs. Stats change constantly during live play, so
	/// there's no change detection on this feed.
	#[serde(default = "defaults::stats_interval")]
	pub stats_interval: u64,

	/// Seconds between ban log change checks. A check that finds no change is free.
	#[serde(default = "defaults::ban_interval")]
	pub ban_interval: u64,
}

mod defaults {
	use std::path::PathBuf;

	pub fn database() -> String {
		String::from("shadowzm")
	}

	pub fn stats_file() -> PathBuf {
		PathBuf::from("cstrike/addons/amxmodx/data/csstats.dat")
	}

	pub fn ban_logs_dir() -> PathBuf {
		PathBuf::from("cstrike/addons/amxmodx/logs")
	}

	pub fn stats_interval() -> u64 {
		60
	}

	pub fn ban_interval() -> u64 {
		5
	}
}
