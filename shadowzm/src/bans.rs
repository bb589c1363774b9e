//! Parsing and reconciliation of the `BAN_HISTORY_*.log` moderation logs.
//!
//! The logs are append-only: the same player can get banned, unbanned and banned again
//! across many rotated files. Files are processed sorted by filename (the rotation
//! counter embedded in the name is our proxy for chronological order) and lines in
//! file order; that ordering is the sole source of "latest event wins". Out-of-order
//! timestamps across rotation boundaries are not corrected.
//!
//! Reconciliation never deletes anything: an unbanned or expired ban keeps its record
//! with `is_expired` set, so the website can show ban history while filtering the
//! active list.

use {
	chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc},
	color_eyre::Result,
	regex::Regex,
	serde::{Deserialize, Serialize},
	std::{
		fs,
		path::{Path, PathBuf},
	},
	tracing::{debug, warn},
};

/// Stored reason when the admin didn't give one.
const DEFAULT_REASON: &str = "Banned";

/// Player IPs never leave the game server.
const HIDDEN_IP: &str = "Hidden";

/// Timestamp format used at the start of every log line, e.g. `01/15/2024 - 12:30:45`.
const TIMESTAMP_FORMAT: &str = "%m/%d/%Y - %H:%M:%S";

/// Filename pattern of the rotating ban history logs.
const LOG_PREFIX: &str = "BAN_HISTORY_";
const LOG_SUFFIX: &str = ".log";

/// The compiled line grammar. Build it once and feed it lines.
#[derive(Debug)]
pub struct LogGrammar {
	/// `L <timestamp>:` prefix found on every well-formed line.
	timestamp: Regex,

	/// Full ban line with admin, player, quoted reason and duration phrase.
	ban: Regex,

	/// Explicit `unbanned <name> <id>` phrase.
	unban: Regex,

	/// Automatic `Ban time is up for: <name> [id]` phrase.
	expire: Regex,

	/// `<magnitude> <unit>` pair inside a duration phrase.
	duration: Regex,
}

impl LogGrammar {
	pub fn new() -> Self {
		Self {
			timestamp: Regex::new(r"^L (\d{2}/\d{2}/\d{4} - \d{2}:\d{2}:\d{2}):").unwrap(),
			ban: Regex::new(
				r#"^L (\d{2}/\d{2}/\d{4} - \d{2}:\d{2}:\d{2}): (.+?) <([^>]*)> banned (.+?) <([^>]+)> \|\| Reason: "([^"]*)" \|\| Ban Length: (.+)$"#,
			)
			.unwrap(),
			unban: Regex::new(r"unbanned .+? <([^>]+)>").unwrap(),
			expire: Regex::new(r"Ban time is up for: .+ \[([^\]]+)\]").unwrap(),
			duration: Regex::new(r"(\d+)\s*(minute|hour|day|week|month|year)").unwrap(),
		}
	}

	/// Classifies one log line. Lines that match neither grammar are `None`.
	///
	/// Unban lines occasionally miss the timestamp prefix; those fall back to `now`,
	/// which still expires every ban recorded so far.
	pub fn parse_line(&self, line: &str, now: DateTime<Utc>) -> Option<BanEvent> {
		let line = line.trim();

		if line.contains("unbanned") || line.contains("Ban time is up") {
			let steam_id = self
				.unban
				.captures(line)
				.or_else(|| self.expire.captures(line))
				.map(|caps| caps[1].trim().to_owned())?;

			let timestamp = self
				.timestamp
				.captures(line)
				.and_then(|caps| parse_timestamp(&caps[1]))
				.unwrap_or(now);

			return Some(BanEvent::Unban { steam_id, timestamp });
		}

		if line.contains("banned") && line.contains("||") {
			let caps = self.ban.captures(line)?;
			let raw_timestamp = caps[1].to_owned();
			let timestamp = parse_timestamp(&raw_timestamp)?;
			let reason = caps[6].trim();

			return Some(BanEvent::Ban {
				timestamp,
				raw_timestamp,
				admin_name: caps[2].trim().to_owned(),
				admin_id: caps[3].trim().to_owned(),
				nickname: caps[4].trim().to_owned(),
				steam_id: caps[5].trim().to_owned(),
				reason: if reason.is_empty() {
					DEFAULT_REASON.to_owned()
				} else {
					reason.to_owned()
				},
				duration: caps[7].trim().to_owned(),
			});
		}

		None
	}

	/// Turns a duration phrase into the instant the ban runs out.
	///
	/// `None` means permanent: either the phrase says so, or it contains no
	/// recognizable `<magnitude> <unit>` pair at all. An unreadable duration must
	/// not drop the ban.
	pub fn parse_expiry(
		&self,
		duration: &str,
		ban_date: DateTime<Utc>,
	) -> Option<DateTime<Utc>> {
		let duration = duration.to_lowercase();

		if duration.contains("permanent") {
			return None;
		}

		let caps = self.duration.captures(&duration)?;
		let magnitude = caps[1].parse::<i64>().ok()?;

		// A magnitude too large for the calendar is as good as permanent, and a
		// broken log line must never take down the sync loop.
		let offset = match &caps[2] {
			"minute" => Duration::try_minutes(magnitude),
			"hour" => Duration::try_hours(magnitude),
			"day" => Duration::try_days(magnitude),
			"week" => Duration::try_weeks(magnitude),
			"month" => magnitude
				.checked_mul(30)
				.and_then(Duration::try_days),
			"year" => magnitude
				.checked_mul(365)
				.and_then(Duration::try_days),
			_ => None,
		}?;

		ban_date.checked_add_signed(offset)
	}
}

impl Default for LogGrammar {
	fn default() -> Self {
		Self::new()
	}
}

/// One parsed log line. Events are immutable; they are the append-only source of
/// truth that [`reconcile_files`] projects into [`BanRecord`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BanEvent {
	Ban {
		timestamp: DateTime<Utc>,
		/// The timestamp exactly as written in the log; hashed into the record id.
		raw_timestamp: String,
		admin_name: String,
		admin_id: String,
		nickname: String,
		steam_id: String,
		reason: String,
		duration: String,
	},
	Unban {
		steam_id: String,
		timestamp: DateTime<Utc>,
	},
}

/// The document the website's `bans` collection stores. Keyed by a synthetic id so a
/// player banned three times owns three records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BanRecord {
	pub id: String,
	#[serde(rename = "player_nickname")]
	pub nickname: String,
	#[serde(rename = "steamid")]
	pub steam_id: String,
	pub ip: String,
	pub reason: String,
	pub admin_name: String,
	pub duration: String,
	pub ban_date: DateTime<Utc>,
	/// `None` means permanent.
	pub expires_at: Option<DateTime<Utc>>,
	pub is_expired: bool,
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
	NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
		.ok()
		.map(|naive| Utc.from_utc_datetime(&naive))
}

/// Stable key for a ban: the subject id plus a short hash of the originating line's
/// timestamp, so re-running reconciliation always lands on the same document.
fn ban_id(steam_id: &str, raw_timestamp: &str) -> String {
	let hex = blake3::hash(raw_timestamp.as_bytes()).to_hex();
	format!("{steam_id}_{}", &hex[..12])
}

/// Reconciles an ordered set of (path, contents) pairs into the current ban records.
///
/// A record starts out expired when its `expires_at` is not after `now`. After the
/// full pass, every record whose subject has an unban event with a strictly later
/// timestamp is marked expired as well.
#[tracing::instrument(skip(files))]
pub fn reconcile_files<I>(files: I, now: DateTime<Utc>) -> Vec<BanRecord>
where
	I: IntoIterator<Item = (PathBuf, String)>,
{
	let grammar = LogGrammar::new();
	let mut records: Vec<BanRecord> = Vec::new();
	let mut unbans: Vec<(String, DateTime<Utc>)> = Vec::new();

	for (path, contents) in files {
		debug!("Scanning {}", path.display());

		for line in contents.lines() {
			match grammar.parse_line(line, now) {
				Some(BanEvent::Ban {
					timestamp,
					raw_timestamp,
					admin_name,
					nickname,
					steam_id,
					reason,
					duration,
					..
				}) => {
					let expires_at = grammar.parse_expiry(&duration, timestamp);
					let is_expired = expires_at.map_or(false, |expiry| expiry <= now);

					records.push(BanRecord {
						id: ban_id(&steam_id, &raw_timestamp),
						nickname,
						steam_id,
						ip: HIDDEN_IP.to_owned(),
						reason,
						admin_name,
						duration,
						ban_date: timestamp,
						expires_at,
						is_expired,
					});
				}
				Some(BanEvent::Unban { steam_id, timestamp }) => {
					unbans.push((steam_id, timestamp));
				}
				None => {}
			}
		}
	}

	for (steam_id, unban_time) in &unbans {
		for record in records
			.iter_mut()
			.filter(|record| &record.steam_id == steam_id)
		{
			if record.ban_date < *unban_time {
				record.is_expired = true;
			}
		}
	}

	records
}

/// The `BAN_HISTORY_*.log` files in `dir`, sorted by filename.
pub fn collect_log_files(dir: &Path) -> Result<Vec<PathBuf>> {
	let mut files = Vec::new();

	for entry in fs::read_dir(dir)? {
		let entry = entry?;
		let name = entry.file_name();
		let Some(name) = name.to_str() else { continue };

		if name.starts_with(LOG_PREFIX) && name.ends_with(LOG_SUFFIX) {
			files.push(entry.path());
		}
	}

	files.sort();
	Ok(files)
}

/// Reads and reconciles every ban log in `dir`. Unreadable files are skipped with a
/// warning; invalid UTF-8 is replaced rather than rejected.
#[tracing::instrument]
pub fn reconcile_dir(dir: &Path, now: DateTime<Utc>) -> Result<Vec<BanRecord>> {
	let files = collect_log_files(dir)?;

	let contents = files
		.into_iter()
		.filter_map(|path| match fs::read(&path) {
			Ok(bytes) => Some((path, String::from_utf8_lossy(&bytes).into_owned())),
			Err(why) => {
				warn!("Failed to read {}: {why:?}", path.display());
				None
			}
		});

	Ok(reconcile_files(contents, now))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ban_line(ts: &str, nickname: &str, steam_id: &str, reason: &str, length: &str) -> String {
		format!(
			r#"L {ts}: ADMIN <STEAM_0:0:111> banned {nickname} <{steam_id}> || Reason: "{reason}" || Ban Length: {length}"#
		)
	}

	fn at(ts: &str) -> DateTime<Utc> {
		parse_timestamp(ts).unwrap()
	}

	#[test]
	fn parses_a_ban_line() {
		let grammar = LogGrammar::new();
		let line = ban_line("01/15/2024 - 12:30:45", "Cheater", "STEAM_0:0:222", "wallhack", "3 days");

		let Some(BanEvent::Ban {
			timestamp,
			admin_name,
			nickname,
			steam_id,
			reason,
			duration,
			..
		}) = grammar.parse_line(&line, Utc::now())
		else {
			panic!("expected a ban event");
		};

		assert_eq!(timestamp, at("01/15/2024 - 12:30:45"));
		assert_eq!(admin_name, "ADMIN");
		assert_eq!(nickname, "Cheater");
		assert_eq!(steam_id, "STEAM_0:0:222");
		assert_eq!(reason, "wallhack");
		assert_eq!(duration, "3 days");
	}

	#[test]
	fn empty_reason_defaults() {
		let grammar = LogGrammar::new();
		let line = ban_line("01/15/2024 - 12:30:45", "X", "STEAM_0:0:222", "", "1 hour");

		let Some(BanEvent::Ban { reason, .. }) = grammar.parse_line(&line, Utc::now()) else {
			panic!("expected a ban event");
		};

		assert_eq!(reason, DEFAULT_REASON);
	}

	#[test]
	fn parses_unban_and_expire_lines() {
		let grammar = LogGrammar::new();
		let now = Utc::now();

		let unban = "L 01/16/2024 - 10:00:00: ADMIN <STEAM_0:0:111> unbanned Cheater <STEAM_0:0:222>";
		assert_eq!(
			grammar.parse_line(unban, now),
			Some(BanEvent::Unban {
				steam_id: String::from("STEAM_0:0:222"),
				timestamp: at("01/16/2024 - 10:00:00"),
			})
		);

		let expire = "L 01/16/2024 - 10:00:00: Ban time is up for: Cheater [STEAM_0:0:333]";
		assert_eq!(
			grammar.parse_line(expire, now),
			Some(BanEvent::Unban {
				steam_id: String::from("STEAM_0:0:333"),
				timestamp: at("01/16/2024 - 10:00:00"),
			})
		);
	}

	#[test]
	fn ignores_chatter() {
		let grammar = LogGrammar::new();
		let now = Utc::now();

		assert_eq!(grammar.parse_line("", now), None);
		assert_eq!(grammar.parse_line("L 01/15/2024 - 12:00:00: Log file started", now), None);
		assert_eq!(grammar.parse_line("some player said: banned lol", now), None);
	}

	#[test]
	fn duration_three_days() {
		let grammar = LogGrammar::new();
		let ban_date = at("01/01/2024 - 00:00:00");

		assert_eq!(
			grammar.parse_expiry("3 days", ban_date),
			Some(at("01/04/2024 - 00:00:00"))
		);
	}

	#[test]
	fn duration_units() {
		let grammar = LogGrammar::new();
		let ban_date = at("01/01/2024 - 00:00:00");

		assert_eq!(
			grammar.parse_expiry("30 minutes", ban_date),
			Some(ban_date + Duration::minutes(30))
		);
		assert_eq!(
			grammar.parse_expiry("2 weeks", ban_date),
			Some(ban_date + Duration::weeks(2))
		);
		assert_eq!(
			grammar.parse_expiry("1 month", ban_date),
			Some(ban_date + Duration::days(30))
		);
		assert_eq!(
			grammar.parse_expiry("1 year", ban_date),
			Some(ban_date + Duration::days(365))
		);
	}

	#[test]
	fn permanent_and_garbage_durations_never_expire() {
		let grammar = LogGrammar::new();
		let ban_date = at("01/01/2024 - 00:00:00");

		assert_eq!(grammar.parse_expiry("Permanent Ban", ban_date), None);
		assert_eq!(grammar.parse_expiry("forever and ever", ban_date), None);
	}

	#[test]
	fn absurd_magnitudes_fall_back_to_permanent() {
		let grammar = LogGrammar::new();
		let ban_date = at("01/01/2024 - 00:00:00");

		// past chrono's Duration range
		assert_eq!(grammar.parse_expiry("999999999999 days", ban_date), None);
		// i64 overflow in the unit conversion
		assert_eq!(
			grammar.parse_expiry("9223372036854775807 years", ban_date),
			None
		);
		// doesn't even fit in i64
		assert_eq!(
			grammar.parse_expiry("99999999999999999999 minutes", ban_date),
			None
		);
		// fits in a Duration but lands past the calendar's end
		assert_eq!(grammar.parse_expiry("100000000 days", ban_date), None);
		// sane magnitudes still work
		assert_eq!(
			grammar.parse_expiry("100 years", ban_date),
			Some(ban_date + Duration::days(36_500))
		);
	}

	#[test]
	fn ban_unban_ban_keeps_both_records() {
		let log = [
			ban_line("01/01/2024 - 00:00:00", "A", "STEAM_0:0:222", "first", "permanent"),
			String::from(
				"L 01/02/2024 - 00:00:00: ADMIN <STEAM_0:0:111> unbanned A <STEAM_0:0:222>",
			),
			ban_line("01/03/2024 - 00:00:00", "A", "STEAM_0:0:222", "second", "permanent"),
		]
		.join("\n");

		let now = at("01/04/2024 - 00:00:00");
		let records =
			reconcile_files([(PathBuf::from("BAN_HISTORY_0101.log"), log)], now);

		assert_eq!(records.len(), 2);
		assert!(records[0].is_expired);
		assert!(!records[1].is_expired);
		assert_eq!(records[0].reason, "first");
		assert_eq!(records[1].reason, "second");
		assert_ne!(records[0].id, records[1].id);
	}

	#[test]
	fn unban_in_later_file_expires_earlier_ban() {
		let first = ban_line("01/01/2024 - 00:00:00", "A", "STEAM_0:0:222", "x", "permanent");
		let second = String::from(
			"L 01/02/2024 - 00:00:00: Ban time is up for: A [STEAM_0:0:222]",
		);

		let now = at("01/03/2024 - 00:00:00");
		let records = reconcile_files(
			[
				(PathBuf::from("BAN_HISTORY_0101.log"), first),
				(PathBuf::from("BAN_HISTORY_0102.log"), second),
			],
			now,
		);

		assert_eq!(records.len(), 1);
		assert!(records[0].is_expired);
	}

	#[test]
	fn timed_ban_expires_on_its_own() {
		let log = ban_line("01/01/2024 - 00:00:00", "A", "STEAM_0:0:222", "x", "3 days");

		let before = reconcile_files(
			[(PathBuf::from("BAN_HISTORY_0101.log"), log.clone())],
			at("01/02/2024 - 00:00:00"),
		);
		assert!(!before[0].is_expired);
		assert_eq!(before[0].expires_at, Some(at("01/04/2024 - 00:00:00")));

		let after = reconcile_files(
			[(PathBuf::from("BAN_HISTORY_0101.log"), log)],
			at("01/05/2024 - 00:00:00"),
		);
		assert!(after[0].is_expired);
	}

	#[test]
	fn permanent_ban_only_expires_by_unban() {
		let log = ban_line("01/01/2024 - 00:00:00", "A", "STEAM_0:0:222", "x", "permanent");

		let records = reconcile_files(
			[(PathBuf::from("BAN_HISTORY_0101.log"), log)],
			at("12/31/2030 - 00:00:00"),
		);

		assert_eq!(records[0].expires_at, None);
		assert!(!records[0].is_expired);
	}

	#[test]
	fn unban_does_not_touch_other_subjects() {
		let log = [
			ban_line("01/01/2024 - 00:00:00", "A", "STEAM_0:0:222", "x", "permanent"),
			ban_line("01/01/2024 - 00:30:00", "B", "STEAM_0:0:333", "y", "permanent"),
			String::from(
				"L 01/02/2024 - 00:00:00: ADMIN <STEAM_0:0:111> unbanned A <STEAM_0:0:222>",
			),
		]
		.join("\n");

		let records = reconcile_files(
			[(PathBuf::from("BAN_HISTORY_0101.log"), log)],
			at("01/03/2024 - 00:00:00"),
		);

		assert_eq!(records.len(), 2);
		assert!(records[0].is_expired);
		assert!(!records[1].is_expired);
	}

	#[test]
	fn record_ids_are_stable_across_runs() {
		let log = ban_line("01/01/2024 - 00:00:00", "A", "STEAM_0:0:222", "x", "permanent");
		let now = at("01/02/2024 - 00:00:00");

		let first = reconcile_files(
			[(PathBuf::from("BAN_HISTORY_0101.log"), log.clone())],
			now,
		);
		let second =
			reconcile_files([(PathBuf::from("BAN_HISTORY_0101.log"), log)], now);

		assert_eq!(first[0].id, second[0].id);
		assert!(first[0].id.starts_with("STEAM_0:0:222_"));
	}
}
