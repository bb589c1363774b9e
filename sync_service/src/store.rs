//! MongoDB adapter for the `players` and `bans` collections.
//!
//! The website's webhook ingestion path writes the same collections concurrently, so
//! nothing here assumes ownership: every write is an upsert keyed by the record's
//! natural key and safe to repeat.

use {
	crate::Config,
	bson::{doc, to_document},
	color_eyre::Result,
	mongodb::{
		options::{ClientOptions, UpdateOptions},
		Client, Collection,
	},
	shadowzm::{BanRecord, PlayerStatRecord},
	std::time::Duration,
	tracing::{info, warn},
};

/// How long a connection attempt may take before it counts as a tick failure.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Store {
	players: Collection<PlayerStatRecord>,
	bans: Collection<BanRecord>,
}

impl Store {
	/// Establishes the connection and pings the server, so a bad URL fails at startup
	/// instead of on the first tick.
	#[tracing::instrument(skip(config), fields(database = %config.database))]
	pub async fn connect(config: &Config) -> Result<Self> {
		let mut options = ClientOptions::parse(&config.mongo_url).await?;
		options.server_selection_timeout = Some(CONNECT_TIMEOUT);

		let client = Client::with_options(options)?;
		let database = client.database(&config.database);
		database
			.run_command(doc! { "ping": 1 }, None)
			.await?;

		info!("Connected to MongoDB.");

		Ok(Self {
			players: database.collection("players"),
			bans: database.collection("bans"),
		})
	}

	/// Upserts every player keyed by steam id. A single bad record doesn't abort the
	/// batch. Returns how many records made it.
	pub async fn upsert_players(&self, players: &[PlayerStatRecord]) -> Result<usize> {
		let mut synced = 0;

		for player in players {
			let update = doc! {
				"$set": to_document(player)?,
				"$setOnInsert": { "id": &player.steam_id },
			};

			match self
				.players
				.update_one(
					doc! { "steamid": &player.steam_id },
					update,
					UpdateOptions::builder()
						.upsert(true)
						.build(),
				)
				.await
			{
				Ok(_) => synced += 1,
				Err(why) => warn!("Failed to sync player `{}`: {why:?}", player.nickname),
			}
		}

		Ok(synced)
	}

	/// Upserts every ban keyed by its synthetic id, so reruns over unchanged logs
	/// never create duplicates.
	pub async fn upsert_bans(&self, bans: &[BanRecord]) -> Result<usize> {
		let mut synced = 0;

		for ban in bans {
			match self
				.bans
				.update_one(
					doc! { "id": &ban.id },
					doc! { "$set": to_document(ban)? },
					UpdateOptions::builder()
						.upsert(true)
						.build(),
				)
				.await
			{
				Ok(_) => synced += 1,
				Err(why) => warn!("Failed to sync ban for `{}`: {why:?}", ban.nickname),
			}
		}

		Ok(synced)
	}
}
