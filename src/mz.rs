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

//! MZ container (spec.md section 4.9): zlib-compressed blobs keyed by a
//! 16-byte content hash, partitioned into one of 65536 files by the
//! hash's first two bytes. Each record is `id(14B) || zlen(u32 LE) ||
//! zdata`; the hash's first two bytes (the file selector) are never
//! stored in the record itself.

use crate::codec;
use crate::error::{Error, Result};
use crate::path;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// `MZ_CACHE_SIZE`: write-buffer cap per destination file before an
/// insert forces a flush.
pub const MZ_CACHE_SIZE: usize = 16_384;
/// `MZ_MD5`: bytes of the hash stored in a record (hash minus its
/// 2-byte file selector).
pub const MZ_MD5_LEN: usize = 14;
/// `MZ_SIZE`: width of the compressed-length field.
pub const MZ_SIZE_LEN: usize = 4;
/// `MZ_HEAD`: combined record header length.
pub const MZ_HEAD_LEN: usize = MZ_MD5_LEN + MZ_SIZE_LEN;

fn file_id(hash: &[u8; 16]) -> u16 {
	((hash[0] as u16) << 8) | hash[1] as u16
}

fn record_id(hash: &[u8; 16]) -> [u8; MZ_MD5_LEN] {
	let mut id = [0u8; MZ_MD5_LEN];
	id.copy_from_slice(&hash[2..16]);
	id
}

fn mz_file_path(root: &Path, db: &str, table: &str, hash: &[u8; 16], encrypted: bool) -> Result<PathBuf> {
	path::mz_path(root, db, table, file_id(hash), encrypted)
}

fn deflate(data: &[u8]) -> Result<Vec<u8>> {
	let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
	encoder.write_all(data)?;
	Ok(encoder.finish()?)
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
	let mut decoder = ZlibDecoder::new(data);
	let mut out = Vec::new();
	decoder.read_to_end(&mut out).map_err(|_| Error::BadFormat("corrupted zlib stream in mz record"))?;
	Ok(out)
}

/// One parsed record: the 14-byte id plus its still-compressed payload.
struct Entry {
	id: [u8; MZ_MD5_LEN],
	zdata: Vec<u8>,
}

fn parse_entries(bytes: &[u8]) -> Vec<Entry> {
	let mut entries = Vec::new();
	let mut pos = 0usize;
	while pos + MZ_HEAD_LEN <= bytes.len() {
		let mut id = [0u8; MZ_MD5_LEN];
		id.copy_from_slice(&bytes[pos..pos + MZ_MD5_LEN]);
		pos += MZ_MD5_LEN;
		let zlen = match codec::read_u32(&bytes[pos..pos + MZ_SIZE_LEN]) {
			Ok(v) => v as usize,
			Err(_) => break,
		};
		pos += MZ_SIZE_LEN;
		if pos + zlen > bytes.len() {
			break;
		}
		entries.push(Entry { id, zdata: bytes[pos..pos + zlen].to_vec() });
		pos += zlen;
	}
	entries
}

fn encode_entry(buf: &mut Vec<u8>, id: &[u8; MZ_MD5_LEN], zdata: &[u8]) {
	buf.extend_from_slice(id);
	let mut len_buf = [0u8; MZ_SIZE_LEN];
	codec::write_u32(&mut len_buf, zdata.len() as u32);
	buf.extend_from_slice(&len_buf);
	buf.extend_from_slice(zdata);
}

/// Buffers inserts per destination file up to `MZ_CACHE_SIZE` bytes
/// before appending, mirroring the original's `mz_cache_item` write
/// buffer (spec.md section 4.9).
pub struct MzWriter {
	root: PathBuf,
	db: String,
	table: String,
	encrypted: bool,
	cache: HashMap<u16, Vec<u8>>,
}

impl MzWriter {
	pub fn new(root: &Path, db: &str, table: &str, encrypted: bool) -> MzWriter {
		MzWriter { root: root.to_path_buf(), db: db.to_string(), table: table.to_string(), encrypted, cache: HashMap::new() }
	}

	/// Compresses `data` and appends `id(14B) || zlen || zdata` to the
	/// cache for `hash`'s file, flushing that file if the cache would
	/// exceed `MZ_CACHE_SIZE`. A no-op if `hash` already exists in the
	/// add-cache or on disk (spec.md section 4.9's "Insert": only write
	/// if the id does not already exist on disk or in the in-memory
	/// add-cache), matching the original's `mz_add(..., check, ...)` gate
	/// via `mz_exists()` before compressing.
	pub fn insert(&mut self, hash: &[u8; 16], data: &[u8]) -> Result<()> {
		let id = file_id(hash);
		let wanted = record_id(hash);

		if let Some(buf) = self.cache.get(&id) {
			if parse_entries(buf).iter().any(|e| e.id == wanted) {
				return Ok(());
			}
		}
		if exists(&self.root, &self.db, &self.table, hash, self.encrypted)? {
			return Ok(());
		}

		let zdata = deflate(data)?;
		let mut entry = Vec::with_capacity(MZ_HEAD_LEN + zdata.len());
		encode_entry(&mut entry, &wanted, &zdata);

		let buf = self.cache.entry(id).or_insert_with(Vec::new);
		if buf.len() + entry.len() > MZ_CACHE_SIZE {
			self.flush_one(id)?;
		}
		self.cache.entry(id).or_insert_with(Vec::new).extend_from_slice(&entry);
		Ok(())
	}

	fn flush_one(&mut self, id: u16) -> Result<()> {
		if let Some(buf) = self.cache.remove(&id) {
			if buf.is_empty() {
				return Ok(());
			}
			let path = path::mz_path(&self.root, &self.db, &self.table, id, self.encrypted)?;
			let mut file = OpenOptions::new().create(true).append(true).open(path)?;
			file.write_all(&buf)?;
		}
		Ok(())
	}

	pub fn close(mut self) -> Result<()> {
		let ids: Vec<u16> = self.cache.keys().copied().collect();
		for id in ids {
			self.flush_one(id)?;
		}
		Ok(())
	}
}

/// `mz exists <db>/<t> <hash>`.
pub fn exists(root: &Path, db: &str, table: &str, hash: &[u8; 16], encrypted: bool) -> Result<bool> {
	let path = mz_file_path(root, db, table, hash, encrypted)?;
	if !path.exists() {
		return Ok(false);
	}
	let bytes = std::fs::read(path)?;
	let wanted = record_id(hash);
	Ok(parse_entries(&bytes).iter().any(|e| e.id == wanted))
}

/// `mz cat <db>/<t> <hash>`: returns the decompressed payload, if present.
pub fn cat(root: &Path, db: &str, table: &str, hash: &[u8; 16], encrypted: bool) -> Result<Option<Vec<u8>>> {
	let path = mz_file_path(root, db, table, hash, encrypted)?;
	if !path.exists() {
		return Ok(None);
	}
	let bytes = std::fs::read(path)?;
	let wanted = record_id(hash);
	match parse_entries(&bytes).into_iter().find(|e| e.id == wanted) {
		Some(e) => Ok(Some(inflate(&e.zdata)?)),
		None => Ok(None),
	}
}

/// `mz delete <db>/<t> <hash>`: rewrites the file without the matching
/// record. Returns whether anything was removed.
pub fn delete(root: &Path, db: &str, table: &str, hash: &[u8; 16], encrypted: bool) -> Result<bool> {
	let path = mz_file_path(root, db, table, hash, encrypted)?;
	if !path.exists() {
		return Ok(false);
	}
	let bytes = std::fs::read(&path)?;
	let wanted = record_id(hash);
	let entries = parse_entries(&bytes);
	let before = entries.len();
	let kept: Vec<Entry> = entries.into_iter().filter(|e| e.id != wanted).collect();
	if kept.len() == before {
		return Ok(false);
	}
	write_entries(&path, &kept)?;
	Ok(true)
}

/// `mz list keys <db>/<t> <file-id-hex>`: every record id present in one
/// partition file.
pub fn list_keys(root: &Path, db: &str, table: &str, mz_id: u16, encrypted: bool) -> Result<Vec<[u8; MZ_MD5_LEN]>> {
	let path = path::mz_path(root, db, table, mz_id, encrypted)?;
	if !path.exists() {
		return Ok(Vec::new());
	}
	let bytes = std::fs::read(path)?;
	Ok(parse_entries(&bytes).into_iter().map(|e| e.id).collect())
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CollateReport {
	pub dup: u32,
	pub ignored: u32,
	pub orphan: u32,
	pub excluded: u32,
	pub under_min: u32,
}

/// `mz collate <db>/<t> <file-id-hex>`: dedupes one partition file by
/// record id, keeping the first occurrence (spec.md section 4.9's
/// "collate drops exact duplicate ids" rule). Re-running on an already
/// collated file is a no-op.
pub fn collate_file(root: &Path, db: &str, table: &str, mz_id: u16, encrypted: bool) -> Result<CollateReport> {
	let mut report = CollateReport::default();
	let path = path::mz_path(root, db, table, mz_id, encrypted)?;
	if !path.exists() {
		report.orphan += 1;
		return Ok(report);
	}
	let bytes = std::fs::read(&path)?;
	let entries = parse_entries(&bytes);
	let mut seen = std::collections::HashSet::new();
	let mut kept = Vec::with_capacity(entries.len());
	for e in entries {
		if !seen.insert(e.id) {
			report.dup += 1;
			continue;
		}
		kept.push(e);
	}
	write_entries(&path, &kept)?;
	Ok(report)
}

fn write_entries(path: &Path, entries: &[Entry]) -> Result<()> {
	let mut buf = Vec::new();
	for e in entries {
		encode_entry(&mut buf, &e.id, &e.zdata);
	}
	std::fs::write(path, buf)?;
	Ok(())
}

/// `mz check <db>/<t> <file-id-hex>`: every record's declared length must
/// land exactly on the next record boundary, with no trailing slack.
pub fn check_integrity(root: &Path, db: &str, table: &str, mz_id: u16, encrypted: bool) -> Result<bool> {
	let path = path::mz_path(root, db, table, mz_id, encrypted)?;
	if !path.exists() {
		return Ok(true);
	}
	let bytes = std::fs::read(path)?;
	let mut pos = 0usize;
	while pos + MZ_HEAD_LEN <= bytes.len() {
		pos += MZ_MD5_LEN;
		let zlen = codec::read_u32(&bytes[pos..pos + MZ_SIZE_LEN])? as usize;
		pos += MZ_SIZE_LEN;
		if pos + zlen > bytes.len() {
			return Ok(false);
		}
		if inflate(&bytes[pos..pos + zlen]).is_err() {
			return Ok(false);
		}
		pos += zlen;
	}
	Ok(pos == bytes.len())
}

#[cfg(test)]
mod test {
	use super::*;

	fn setup(dir: &std::path::Path, db: &str, table: &str) {
		path::create_database(dir, db).unwrap();
		path::create_table_dir(dir, db, table).unwrap();
	}

	fn hash(seed: u8) -> [u8; 16] {
		let mut h = [0u8; 16];
		for (i, b) in h.iter_mut().enumerate() {
			*b = seed.wrapping_add(i as u8);
		}
		h
	}

	#[test]
	fn insert_then_cat_roundtrips() {
		let dir = tempfile::tempdir().unwrap();
		setup(dir.path(), "oss", "file");
		let h = hash(1);
		let mut w = MzWriter::new(dir.path(), "oss", "file", false);
		w.insert(&h, b"hello world").unwrap();
		w.close().unwrap();

		assert!(exists(dir.path(), "oss", "file", &h, false).unwrap());
		assert_eq!(cat(dir.path(), "oss", "file", &h, false).unwrap(), Some(b"hello world".to_vec()));
	}

	#[test]
	fn missing_key_returns_none() {
		let dir = tempfile::tempdir().unwrap();
		setup(dir.path(), "oss", "file");
		let h = hash(2);
		assert_eq!(cat(dir.path(), "oss", "file", &h, false).unwrap(), None);
		assert!(!exists(dir.path(), "oss", "file", &h, false).unwrap());
	}

	#[test]
	fn delete_removes_record() {
		let dir = tempfile::tempdir().unwrap();
		setup(dir.path(), "oss", "file");
		let h = hash(3);
		let mut w = MzWriter::new(dir.path(), "oss", "file", false);
		w.insert(&h, b"payload").unwrap();
		w.close().unwrap();

		assert!(delete(dir.path(), "oss", "file", &h, false).unwrap());
		assert!(!exists(dir.path(), "oss", "file", &h, false).unwrap());
		assert!(!delete(dir.path(), "oss", "file", &h, false).unwrap());
	}

	#[test]
	fn insert_is_a_no_op_against_its_own_cache() {
		let dir = tempfile::tempdir().unwrap();
		setup(dir.path(), "oss", "file");
		let h = hash(4);
		let mz_id = file_id(&h);
		let mut w = MzWriter::new(dir.path(), "oss", "file", false);
		w.insert(&h, b"one").unwrap();
		w.insert(&h, b"one-again").unwrap(); // same id, already buffered: no-op
		w.close().unwrap();

		assert_eq!(cat(dir.path(), "oss", "file", &h, false).unwrap(), Some(b"one".to_vec()));
		let keys = list_keys(dir.path(), "oss", "file", mz_id, false).unwrap();
		assert_eq!(keys.len(), 1);
	}

	#[test]
	fn insert_is_a_no_op_against_an_existing_disk_entry() {
		let dir = tempfile::tempdir().unwrap();
		setup(dir.path(), "oss", "file");
		let h = hash(7);
		let mut first = MzWriter::new(dir.path(), "oss", "file", false);
		first.insert(&h, b"first").unwrap();
		first.close().unwrap();

		let mut second = MzWriter::new(dir.path(), "oss", "file", false);
		second.insert(&h, b"second").unwrap(); // id already on disk: no-op
		second.close().unwrap();

		assert_eq!(cat(dir.path(), "oss", "file", &h, false).unwrap(), Some(b"first".to_vec()));
	}

	#[test]
	fn collate_is_idempotent_and_dedupes_records_already_on_disk() {
		// Duplicate ids in one partition file can still arise outside
		// `MzWriter::insert`'s existence check (a merge of two tables, or
		// data written before the check existed); collate must still
		// reconcile them.
		let dir = tempfile::tempdir().unwrap();
		setup(dir.path(), "oss", "file");
		let h = hash(4);
		let mz_id = file_id(&h);
		let zdata = deflate(b"one").unwrap();
		let mut buf = Vec::new();
		encode_entry(&mut buf, &record_id(&h), &zdata);
		encode_entry(&mut buf, &record_id(&h), &zdata);
		let path = path::mz_path(dir.path(), "oss", "file", mz_id, false).unwrap();
		std::fs::write(&path, &buf).unwrap();

		let report = collate_file(dir.path(), "oss", "file", mz_id, false).unwrap();
		assert_eq!(report.dup, 1);
		let keys = list_keys(dir.path(), "oss", "file", mz_id, false).unwrap();
		assert_eq!(keys.len(), 1);

		let second = collate_file(dir.path(), "oss", "file", mz_id, false).unwrap();
		assert_eq!(second.dup, 0);
	}

	#[test]
	fn check_integrity_detects_truncation() {
		let dir = tempfile::tempdir().unwrap();
		setup(dir.path(), "oss", "file");
		let h = hash(5);
		let mz_id = file_id(&h);
		let mut w = MzWriter::new(dir.path(), "oss", "file", false);
		w.insert(&h, b"data").unwrap();
		w.close().unwrap();
		assert!(check_integrity(dir.path(), "oss", "file", mz_id, false).unwrap());

		let path = path::mz_path(dir.path(), "oss", "file", mz_id, false).unwrap();
		let mut bytes = std::fs::read(&path).unwrap();
		bytes.truncate(bytes.len() - 2);
		std::fs::write(&path, bytes).unwrap();
		assert!(!check_integrity(dir.path(), "oss", "file", mz_id, false).unwrap());
	}
}
