//! The two timed sync loops.
//!
//! The stats loop re-syncs unconditionally: the stats file mutates continuously while
//! the server is live, so change detection would be pure overhead. The ban loop ticks
//! much faster but only does real work when the log file set's fingerprint moved.
//! The loops share nothing but the store handle; a slow or failing tick in one never
//! delays the other.

use {
	crate::{store::Store, Config},
	chrono::Utc,
	color_eyre::Result,
	shadowzm::{
		bans,
		fingerprint::{fingerprint_files, Fingerprint},
		stats,
	},
	std::{sync::Arc, time::Duration},
	tokio::sync::watch,
	tracing::{debug, info, warn},
};

/// Owns everything the loops need. Constructed once at startup, dropped on shutdown;
/// the only mutable state between ticks is the ban loop's last fingerprint, which
/// lives on that loop's stack.
#[derive(Debug)]
pub struct SyncService {
	config: Config,
	store: Store,
}

impl SyncService {
	pub fn new(config: Config, store: Store) -> Self {
		Self { config, store }
	}

	/// Runs both loops until Ctrl-C. A tick in progress finishes before shutdown.
	pub async fn run(self) -> Result<()> {
		info!(
			"Syncing stats every {}s, checking ban logs every {}s.",
			self.config.stats_interval, self.config.ban_interval
		);

		let service = Arc::new(self);
		let (shutdown, _) = watch::channel(false);

		let stats_loop = tokio::spawn({
			let service = Arc::clone(&service);
			let shutdown = shutdown.subscribe();
			async move { service.stats_loop(shutdown).await }
		});

		let ban_loop = tokio::spawn({
			let service = Arc::clone(&service);
			let shutdown = shutdown.subscribe();
			async move { service.ban_loop(shutdown).await }
		});

		tokio::signal::ctrl_c().await?;
		info!("Shutting down.");
		_ = shutdown.send(true);

		_ = tokio::join!(stats_loop, ban_loop);
		Ok(())
	}

	/// Runs a single tick of each feed and exits. Useful for testing a fresh setup.
	pub async fn run_once(self) -> Result<()> {
		self.sync_stats().await?;
		self.sync_bans().await?;
		Ok(())
	}

	async fn stats_loop(&self, mut shutdown: watch::Receiver<bool>) {
		let mut interval =
			tokio::time::interval(Duration::from_secs(self.config.stats_interval));

		loop {
			tokio::select! {
				_ = interval.tick() => {
					if let Err(why) = self.sync_stats().await {
						warn!("Stats sync failed: {why:?}");
					}
				}
				_ = shutdown.changed() => break,
			}
		}
	}

	async fn ban_loop(&self, mut shutdown: watch::Receiver<bool>) {
		let mut interval = tokio::time::interval(Duration::from_secs(self.config.ban_interval));
		let mut last_fingerprint: Option<Fingerprint> = None;

		loop {
			tokio::select! {
				_ = interval.tick() => {
					match self.sync_bans_if_changed(last_fingerprint).await {
						Ok(fingerprint) => last_fingerprint = fingerprint,
						// keep the old fingerprint so the next tick retries
						Err(why) => warn!("Ban sync failed: {why:?}"),
					}
				}
				_ = shutdown.changed() => break,
			}
		}
	}

	#[tracing::instrument(skip(self))]
	async fn sync_stats(&self) -> Result<()> {
		let stats_file = &self.config.stats_file;

		if !stats_file.exists() {
			warn!("Stats file `{}` not found. Nothing to sync.", stats_file.display());
			return Ok(());
		}

		let data = std::fs::read(stats_file)?;
		let decoded = stats::decode(&data);

		if decoded.skipped > 0 {
			warn!("Skipped {} malformed stat records.", decoded.skipped);
		}
		debug!("Decoder stopped with {:?}.", decoded.halt);

		let players = stats::build_player_records(decoded, Utc::now());
		let synced = self
			.store
			.upsert_players(&players)
			.await?;

		info!("Synced {synced}/{} players.", players.len());
		Ok(())
	}

	/// Reconciles and writes only when the log file set actually changed since the
	/// fingerprint passed in. Returns the fingerprint to remember.
	async fn sync_bans_if_changed(
		&self,
		last: Option<Fingerprint>,
	) -> Result<Option<Fingerprint>> {
		let dir = &self.config.ban_logs_dir;

		if !dir.exists() {
			// debug, not warn: this fires every few seconds until the server
			// creates the directory, and startup already warned once
			debug!("Ban log directory `{}` not found. Nothing to sync.", dir.display());
			return Ok(last);
		}

		let files = bans::collect_log_files(dir)?;
		let current = fingerprint_files(&files);

		if Some(current) == last {
			return Ok(last);
		}

		debug!("Ban logs changed.");
		self.sync_bans().await?;
		Ok(Some(current))
	}

	#[tracing::instrument(skip(self))]
	async fn sync_bans(&self) -> Result<()> {
		let dir = &self.config.ban_logs_dir;

		if !dir.exists() {
			warn!("Ban log directory `{}` not found. Nothing to sync.", dir.display());
			return Ok(());
		}

		let records = bans::reconcile_dir(dir, Utc::now())?;
		let synced = self
			.store
			.upsert_bans(&records)
			.await?;

		info!("Synced {synced}/{} bans.", records.len());
		Ok(())
	}
}
