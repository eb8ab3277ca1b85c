// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of Parity.

// Parity is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Parity is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Parity.  If not, see <http://www.gnu.org/licenses/>.

//! Advisory per-table writer lock (spec.md section 4.4).
//!
//! Readers never take this lock; it only serializes writers against each
//! other. The lock file's content (the writer's pid) exists purely for
//! diagnosing a stuck lock, not for correctness.

use crate::error::{Error, Result};
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct TableLock {
	path: PathBuf,
}

impl TableLock {
	/// Acquires the lock for `<lock_dir>/ldb.lock.<db>.<table>`.
	///
	/// Fails with `Error::Locked` if the file already exists. The create
	/// is `create_new` (atomic O_EXCL under the hood via `fs2`'s
	/// exclusive try-lock semantics on the opened handle), so two
	/// processes racing to acquire the same lock cannot both succeed.
	pub fn acquire(lock_dir: &Path, db: &str, table: &str) -> Result<TableLock> {
		std::fs::create_dir_all(lock_dir)?;
		let path = lock_dir.join(format!("ldb.lock.{}.{}", db, table));

		let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
			Ok(f) => f,
			Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
				return Err(Error::Locked(format!("{}/{}", db, table)));
			}
			Err(e) => return Err(e.into()),
		};

		use fs2::FileExt;
		file.try_lock_exclusive().map_err(|_| Error::Locked(format!("{}/{}", db, table)))?;

		let pid = std::process::id();
		write!(file, "{}", pid)?;
		drop(file);

		// Read back and verify, matching spec.md's "create it atomically,
		// write the writer's pid, then read back and verify the pid
		// matches" acquisition protocol.
		let mut check = String::new();
		std::fs::File::open(&path)?.read_to_string(&mut check)?;
		if check.trim().parse::<u32>() != Ok(pid) {
			let _ = std::fs::remove_file(&path);
			return Err(Error::Locked(format!("{}/{}: pid verification failed", db, table)));
		}

		Ok(TableLock { path })
	}

	/// Returns the pid recorded in an existing lock file, for diagnostics.
	pub fn holder(lock_dir: &Path, db: &str, table: &str) -> Option<u32> {
		let path = lock_dir.join(format!("ldb.lock.{}.{}", db, table));
		std::fs::read_to_string(path).ok().and_then(|s| s.trim().parse().ok())
	}
}

impl Drop for TableLock {
	fn drop(&mut self) {
		if let Err(e) = std::fs::remove_file(&self.path) {
			log::warn!(target: "ldb", "failed to remove lock file {}: {}", self.path.display(), e);
		}
	}
}
