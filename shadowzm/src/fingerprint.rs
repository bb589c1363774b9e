//! Cheap change detection over a file set.
//!
//! The ban loop runs every few seconds but the logs barely ever change, so each tick
//! first compares a signature over the file set's sizes and modification times against
//! the previous tick's. The signature only ever answers "did anything change?". It
//! can't say what changed and is never persisted.

use std::{path::PathBuf, time::UNIX_EPOCH};

/// Opaque signature over a file set. Only good for equality comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint(blake3::Hash);

/// Hashes `path:size:mtime;` for every file in order. Files that vanish between
/// listing and stat just don't contribute; the next tick sees the new state.
pub fn fingerprint_files(paths: &[PathBuf]) -> Fingerprint {
	let mut hasher = blake3::Hasher::new();

	for path in paths {
		let Ok(metadata) = path.metadata() else { continue };

		let mtime = metadata
			.modified()
			.ok()
			.and_then(|time| time.duration_since(UNIX_EPOCH).ok())
			.map(|duration| duration.as_nanos())
			.unwrap_or_default();

		hasher.update(format!("{}:{}:{mtime};", path.display(), metadata.len()).as_bytes());
	}

	Fingerprint(hasher.finalize())
}
