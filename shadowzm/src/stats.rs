//! Decoder for the binary `csstats.dat` player statistics file.
//!
//! The file is a flat sequence of records with no record count and no strict length
//! guarantees. Each record is two length-prefixed strings (name, steam id) followed by
//! 7 little-endian `i32` counters. Malformed input never produces an error; it only
//! makes the decoder stop early, and [`Halt`] says why.

use {
	chrono::{DateTime, Utc},
	serde::{Deserialize, Serialize},
};

/// Size of the version field at the start of the file. Always skipped, never validated.
const HEADER_LEN: usize = 2;

/// Longest length the format allows for the name and steam id fields. A larger length
/// prefix means the scanner has run into garbage.
const MAX_FIELD_LEN: u16 = 64;

/// Kills needed per level.
const KILLS_PER_LEVEL: i32 = 500;

/// Level cap.
const MAX_LEVEL: i32 = 50;

/// One raw stat tuple exactly as it appears in the file, before any clamping or
/// derived values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPlayerStats {
	pub name: String,
	pub steam_id: String,
	pub teamkills: i32,
	pub damage: i32,
	pub deaths: i32,
	pub kills: i32,
	pub shots: i32,
	pub hits: i32,
	pub headshots: i32,
}

/// Why the decoder stopped scanning. Everything after the stopping point is discarded;
/// records emitted before it are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
	/// The previous record ended exactly at the end of the buffer.
	EndOfData,

	/// A length prefix of 0.
	ZeroLength,

	/// A length prefix larger than [`MAX_FIELD_LEN`].
	OversizedLength(u16),

	/// Fewer bytes left than the next field needs.
	Truncated,
}

/// Why a fully-read tuple was dropped instead of emitted. Scanning continues at the
/// next record boundary either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Malformed {
	/// Negative kills or deaths.
	NegativeCounters,

	/// The steam id field held nothing but NUL padding.
	EmptySteamID,
}

/// Outcome of reading a single record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
	Record(RawPlayerStats),
	Skipped(Malformed),
	Halted(Halt),
}

/// Cursor over a stats file buffer. [`StatsReader::read_record`] is restartable: after
/// a [`RecordOutcome::Skipped`] the reader sits at the next record boundary.
#[derive(Debug)]
pub struct StatsReader<'data> {
	data: &'data [u8],
	offset: usize,
}

impl<'data> StatsReader<'data> {
	pub fn new(data: &'data [u8]) -> Self {
		Self { data, offset: HEADER_LEN }
	}

	fn read_u16(&mut self) -> Option<u16> {
		let bytes = self.data.get(self.offset..self.offset + 2)?;
		self.offset += 2;
		Some(u16::from_le_bytes([bytes[0], bytes[1]]))
	}

	fn read_i32(&mut self) -> Option<i32> {
		let bytes = self.data.get(self.offset..self.offset + 4)?;
		self.offset += 4;
		Some(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
	}

	/// Reads one length-prefixed string field, tolerating invalid UTF-8 by replacement
	/// and stripping trailing NUL padding.
	fn read_field(&mut self) -> Result<String, Halt> {
		let len = match self.read_u16() {
			Some(0) => return Err(Halt::ZeroLength),
			Some(len) if len > MAX_FIELD_LEN => return Err(Halt::OversizedLength(len)),
			Some(len) => usize::from(len),
			None => return Err(Halt::Truncated),
		};

		let Some(bytes) = self.data.get(self.offset..self.offset + len) else {
			return Err(Halt::Truncated);
		};
		self.offset += len;

		let end = bytes
			.iter()
			.rposition(|&byte| byte != 0)
			.map_or(0, |idx| idx + 1);

		Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
	}

	pub fn read_record(&mut self) -> RecordOutcome {
		if self.offset >= self.data.len() {
			return RecordOutcome::Halted(Halt::EndOfData);
		}

		let name = match self.read_field() {
			Ok(name) => name,
			Err(halt) => return RecordOutcome::Halted(halt),
		};

		let steam_id = match self.read_field() {
			Ok(steam_id) => steam_id,
			Err(halt) => return RecordOutcome::Halted(halt),
		};

		let mut counters = [0; 7];
		for counter in &mut counters {
			match self.read_i32() {
				Some(value) => *counter = value,
				None => return RecordOutcome::Halted(Halt::Truncated),
			}
		}

		let [teamkills, damage, deaths, kills, shots, hits, headshots] = counters;

		if kills < 0 || deaths < 0 {
			return RecordOutcome::Skipped(Malformed::NegativeCounters);
		}

		if steam_id.is_empty() {
			return RecordOutcome::Skipped(Malformed::EmptySteamID);
		}

		RecordOutcome::Record(RawPlayerStats {
			name,
			steam_id,
			teamkills,
			damage,
			deaths,
			kills,
			shots,
			hits,
			headshots,
		})
	}
}

/// Everything a single decode pass produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
	pub records: Vec<RawPlayerStats>,
	pub halt: Halt,
	pub skipped: usize,
}

/// Drains the whole buffer. Never fails; a malformed buffer just yields fewer records.
pub fn decode(data: &[u8]) -> Decoded {
	let mut reader = StatsReader::new(data);
	let mut records = Vec::new();
	let mut skipped = 0;

	let halt = loop {
		match reader.read_record() {
			RecordOutcome::Record(record) => records.push(record),
			RecordOutcome::Skipped(_) => skipped += 1,
			RecordOutcome::Halted(halt) => break halt,
		}
	};

	Decoded { records, halt, skipped }
}

/// The document the website's `players` collection stores, fully replaced on every
/// sync pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatRecord {
	#[serde(rename = "steamid")]
	pub steam_id: String,
	pub nickname: String,
	pub kills: i32,
	pub deaths: i32,
	pub headshots: i32,
	pub kd_ratio: f64,
	pub level: i32,
	pub rank: u32,
	pub last_seen: DateTime<Utc>,
}

/// Turns a decode pass into ranked player records: counters clamped to ≥ 0, K/D
/// rounded to 2 decimals (raw kill count when the player never died), level derived
/// from kills, ranks assigned 1..N by kills descending with ties keeping decode order.
#[tracing::instrument(skip(decoded), fields(records = decoded.records.len()))]
pub fn build_player_records(decoded: Decoded, now: DateTime<Utc>) -> Vec<PlayerStatRecord> {
	let mut players = decoded
		.records
		.into_iter()
		.map(|raw| {
			let kills = raw.kills.max(0);
			let deaths = raw.deaths.max(0);

			let kd_ratio = if deaths > 0 {
				(f64::from(kills) / f64::from(deaths) * 100.0).round() / 100.0
			} else {
				f64::from(kills)
			};

			PlayerStatRecord {
				steam_id: raw.steam_id,
				nickname: raw.name,
				kills,
				deaths,
				headshots: raw.headshots.max(0),
				kd_ratio,
				level: (kills / KILLS_PER_LEVEL).min(MAX_LEVEL),
				rank: 0,
				last_seen: now,
			}
		})
		.collect::<Vec<_>>();

	players.sort_by_key(|player| std::cmp::Reverse(player.kills));

	for (idx, player) in players.iter_mut().enumerate() {
		player.rank = idx as u32 + 1;
	}

	players
}
