//! Core data pipeline for the ShadowZM community website.
//!
//! The game server leaves behind two artifacts: the binary `csstats.dat` player
//! statistics file and a set of rotating `BAN_HISTORY_*.log` moderation logs. This
//! crate turns both into the documents the website's database expects:
//!
//! - [`stats`] decodes the binary file and builds ranked [`PlayerStatRecord`]s.
//! - [`bans`] parses the logs and reconciles them into current [`BanRecord`]s.
//! - [`fingerprint`] computes a cheap signature over the log file set so the sync
//!   loops can skip work when nothing changed.
//!
//! None of this talks to the database; pushing the records into MongoDB is the
//! `sync_service` binary's job.

#![warn(missing_debug_implementations, rust_2018_idioms)]
#![warn(clippy::style, clippy::perf, clippy::complexity, clippy::correctness)]

pub mod bans;
pub mod fingerprint;
pub mod stats;

pub use {
	bans::{BanEvent, BanRecord, LogGrammar},
	fingerprint::{fingerprint_files, Fingerprint},
	stats::PlayerStatRecord,
};
