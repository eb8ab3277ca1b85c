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

//! Sector I/O (spec.md section 4.5): opening, creating, loading and
//! committing one `XX.ldb` file. A sector begins with a fixed map of
//! 2^24 five-byte slots; everything appended after that is node data.

use crate::codec;
use crate::error::{Error, Result};
use crate::path;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Number of slots in a sector's map: one per 3-byte key suffix.
pub const MAP_SLOTS: u64 = 256 * 256 * 256;
/// Bytes per map slot: a 40-bit file offset.
pub const SLOT_LEN: u64 = 5;
/// Total byte size of a sector's map, `LDB_MAP_SIZE` in the original.
pub const MAP_SIZE: u64 = MAP_SLOTS * SLOT_LEN;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OpenMode {
	Read,
	ReadWrite,
	WriteTruncate,
}

pub struct Sector {
	pub file: File,
	pub path: PathBuf,
}

/// Map slot offset for a 4-byte main key: `5 * ((key[3]<<16)|(key[2]<<8)|key[1])`.
/// `key[0]` already selected which sector file we are in.
pub fn map_slot_pos(main_key: &[u8; 4]) -> u64 {
	let suffix = ((main_key[3] as u64) << 16) | ((main_key[2] as u64) << 8) | main_key[1] as u64;
	suffix * SLOT_LEN
}

impl Sector {
	/// Opens `<root>/<db>/<table>/<sector_byte>.ldb`. A read-only open on
	/// a missing sector returns `Ok(None)`; any write mode creates a
	/// zero-filled (sparse) map-sized file lazily.
	pub fn open(root: &Path, db: &str, table: &str, sector_byte: u8, mode: OpenMode) -> Result<Option<Sector>> {
		let sector_path = path::sector_path(root, db, table, sector_byte)?;
		if !sector_path.exists() {
			if mode == OpenMode::Read {
				return Ok(None);
			}
			create_empty(&sector_path)?;
		}
		let file = OpenOptions::new()
			.read(true)
			.write(mode != OpenMode::Read)
			.open(&sector_path)?;
		Ok(Some(Sector { file, path: sector_path }))
	}

	/// Opens the `.out` scratch sector used while collating, removing any
	/// stale leftover from an interrupted previous pass first (mirrors
	/// the original's "delete any stale temp output before writing" step
	/// in `ldb_sector_path`).
	pub fn open_for_collate_output(root: &Path, db: &str, table: &str, sector_byte: u8) -> Result<Sector> {
		let out_path = path::sector_out_path(root, db, table, sector_byte)?;
		if out_path.exists() {
			std::fs::remove_file(&out_path)?;
		}
		create_empty(&out_path)?;
		let file = OpenOptions::new().read(true).write(true).open(&out_path)?;
		Ok(Sector { file, path: out_path })
	}

	pub fn len(&self) -> Result<u64> {
		Ok(self.file.metadata()?.len())
	}

	pub fn read_map_slot(&mut self, main_key: &[u8; 4]) -> Result<u64> {
		let pos = map_slot_pos(main_key);
		let mut buf = [0u8; 5];
		self.file.seek(SeekFrom::Start(pos))?;
		self.file.read_exact(&mut buf)?;
		codec::read_u40(&buf)
	}

	pub fn write_map_slot(&mut self, main_key: &[u8; 4], value: u64) -> Result<()> {
		let pos = map_slot_pos(main_key);
		let mut buf = [0u8; 5];
		codec::write_u40(&mut buf, value);
		self.file.seek(SeekFrom::Start(pos))?;
		self.file.write_all(&buf)?;
		Ok(())
	}

	pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
		self.file.seek(SeekFrom::Start(offset))?;
		self.file.read_exact(buf)?;
		Ok(())
	}

	pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
		self.file.seek(SeekFrom::Start(offset))?;
		self.file.write_all(buf)?;
		Ok(())
	}

	pub fn append(&mut self, buf: &[u8]) -> Result<u64> {
		let offset = self.file.seek(SeekFrom::End(0))?;
		self.file.write_all(buf)?;
		Ok(offset)
	}

	/// Loads the whole file into memory, used by collation and by
	/// readers that prefer one big read over many seeks.
	pub fn load(&mut self) -> Result<Vec<u8>> {
		let mut buf = Vec::with_capacity(self.len()? as usize);
		self.file.seek(SeekFrom::Start(0))?;
		self.file.read_to_end(&mut buf)?;
		Ok(buf)
	}

	pub fn flush(&mut self) -> Result<()> {
		Ok(self.file.flush()?)
	}
}

fn create_empty(path: &Path) -> Result<()> {
	let file = OpenOptions::new().create(true).write(true).read(true).open(path)?;
	// A sparse zero-filled file satisfies "every map slot is either zero
	// or points to a valid list-head offset" without writing 80MiB of
	// real zero bytes for every sector touched.
	file.set_len(MAP_SIZE)?;
	Ok(())
}

/// Commits a `.out` sector produced by a **build** collation pass: rename
/// it over the original `.ldb` (spec.md section 4.5/4.8).
pub fn commit_build(root: &Path, db: &str, table: &str, sector_byte: u8) -> Result<()> {
	let out_path = path::sector_out_path(root, db, table, sector_byte)?;
	let ldb_path = path::sector_path(root, db, table, sector_byte)?;
	std::fs::rename(&out_path, &ldb_path)?;
	Ok(())
}

/// Commits a **merge** collation pass: the destination sector (written
/// directly into its `.ldb` file by the caller, no `.out` staging since
/// it belongs to a different table) is left as-is and the source sector
/// is unlinked.
pub fn commit_merge(root: &Path, src_db: &str, src_table: &str, sector_byte: u8) -> Result<()> {
	let src_path = path::sector_path(root, src_db, src_table, sector_byte)?;
	if src_path.exists() {
		std::fs::remove_file(&src_path)?;
	}
	Ok(())
}

pub fn exists(root: &Path, db: &str, table: &str, sector_byte: u8) -> Result<bool> {
	Ok(path::sector_path(root, db, table, sector_byte)?.exists())
}

pub fn sector_byte_of(key: &[u8]) -> Result<u8> {
	key.first().copied().ok_or(Error::InvalidName("key must be at least 1 byte"))
}

/// Scans a sector's 2^24-slot map for every non-zero slot and returns the
/// corresponding 4-byte main keys (`sector_byte ++ suffix`). Used by
/// collate/merge/delete and by the `dump`/`dump keys` CLI commands, which
/// both need to enumerate every main key a sector holds without walking
/// `2^24` candidate keys one at a time the way the original's triple
/// nested loop does.
pub fn main_keys(sector: &mut Sector, sector_byte: u8) -> Result<Vec<[u8; 4]>> {
	let mut out = Vec::new();
	let mut map = vec![0u8; MAP_SIZE as usize];
	sector.read_at(0, &mut map)?;
	for slot in 0..MAP_SLOTS {
		let off = (slot * SLOT_LEN) as usize;
		let val = codec::read_u40(&map[off..off + 5])?;
		if val != 0 {
			let suffix = slot as u32;
			out.push([sector_byte, ((suffix >> 16) & 0xff) as u8, ((suffix >> 8) & 0xff) as u8, (suffix & 0xff) as u8]);
		}
	}
	Ok(out)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn map_slot_pos_matches_spec_byte_order() {
		let key = [0x11, 0x22, 0x33, 0x44];
		let expected = 5 * (((0x44u64) << 16) | ((0x33u64) << 8) | 0x22u64);
		assert_eq!(map_slot_pos(&key), expected);
	}

	#[test]
	fn open_read_missing_returns_none() {
		let dir = tempfile::tempdir().unwrap();
		path::create_database(dir.path(), "oss").unwrap();
		path::create_table_dir(dir.path(), "oss", "file").unwrap();
		assert!(Sector::open(dir.path(), "oss", "file", 0x11, OpenMode::Read).unwrap().is_none());
	}

	#[test]
	fn open_write_creates_map_sized_file() {
		let dir = tempfile::tempdir().unwrap();
		path::create_database(dir.path(), "oss").unwrap();
		path::create_table_dir(dir.path(), "oss", "file").unwrap();
		let sector = Sector::open(dir.path(), "oss", "file", 0x11, OpenMode::ReadWrite).unwrap().unwrap();
		assert_eq!(sector.len().unwrap(), MAP_SIZE);
	}

	#[test]
	fn map_slot_roundtrip() {
		let dir = tempfile::tempdir().unwrap();
		path::create_database(dir.path(), "oss").unwrap();
		path::create_table_dir(dir.path(), "oss", "file").unwrap();
		let mut sector = Sector::open(dir.path(), "oss", "file", 0x11, OpenMode::ReadWrite).unwrap().unwrap();
		let key = [0x11, 0x22, 0x33, 0x44];
		assert_eq!(sector.read_map_slot(&key).unwrap(), 0);
		sector.write_map_slot(&key, MAP_SIZE + 10).unwrap();
		assert_eq!(sector.read_map_slot(&key).unwrap(), MAP_SIZE + 10);
	}

	#[test]
	fn append_grows_past_map() {
		let dir = tempfile::tempdir().unwrap();
		path::create_database(dir.path(), "oss").unwrap();
		path::create_table_dir(dir.path(), "oss", "file").unwrap();
		let mut sector = Sector::open(dir.path(), "oss", "file", 0x11, OpenMode::ReadWrite).unwrap().unwrap();
		let offset = sector.append(b"hello").unwrap();
		assert_eq!(offset, MAP_SIZE);
		assert_eq!(sector.len().unwrap(), MAP_SIZE + 5);
	}

	#[test]
	fn commit_build_renames_out_over_ldb() {
		let dir = tempfile::tempdir().unwrap();
		path::create_database(dir.path(), "oss").unwrap();
		path::create_table_dir(dir.path(), "oss", "file").unwrap();
		let _ = Sector::open(dir.path(), "oss", "file", 0x11, OpenMode::ReadWrite).unwrap().unwrap();
		let mut out = Sector::open_for_collate_output(dir.path(), "oss", "file", 0x11).unwrap();
		out.append(b"marker").unwrap();
		drop(out);
		commit_build(dir.path(), "oss", "file", 0x11).unwrap();
		let mut merged = Sector::open(dir.path(), "oss", "file", 0x11, OpenMode::Read).unwrap().unwrap();
		let data = merged.load().unwrap();
		assert_eq!(&data[MAP_SIZE as usize..], b"marker");
	}
}
