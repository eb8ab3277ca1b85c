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

//! Bulk write API (spec.md section 4.10): the contract the out-of-scope
//! importer drives. Records are buffered per main key and flushed into a
//! node when the node cap is hit or the main key changes.

use crate::codec;
use crate::config::TableConfig;
use crate::error::{Error, Result};
use crate::node::{self, LenWidth, MAX_NODE_PAYLOAD};
use crate::sector::{OpenMode, Sector};
use std::convert::TryInto;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// MD5("") — `d41d8cd98f00b204e9800998ecf8427e` — one of the two sentinel
/// keys the original rejects at insert time (spec.md section 4.10 and
/// the "Open Questions" note in section 9). The original compares the
/// full 16-byte key, not just the 4-byte main key prefix.
const MD5_EMPTY: [u8; 16] = [0xd4, 0x1d, 0x8c, 0xd9, 0x8f, 0x00, 0xb2, 0x04, 0xe9, 0x80, 0x09, 0x98, 0xec, 0xf8, 0x42, 0x7e];

/// Compares the leading `min(key.len(), 16)` bytes of `key` against the
/// all-zero and MD5-of-empty sentinels, matching the original's
/// `memcmp(itemid, zero_md5, MD5_LEN)` over the whole key (not just its
/// main-key prefix) so a key whose main key happens to collide with a
/// sentinel prefix, but whose subkey differs, is not wrongly rejected.
fn is_sentinel_key(key: &[u8]) -> bool {
	let n = key.len().min(MD5_EMPTY.len());
	let prefix = &key[..n];
	prefix.iter().all(|&b| b == 0) || prefix == &MD5_EMPTY[..n]
}

enum Pending {
	/// Concatenated `subkey ++ data` chunks, one per record.
	Fixed(Vec<u8>, u16),
	/// Subkey groups in insertion order; a record joins the last group
	/// if its subkey matches, otherwise a new group is opened.
	Variable(Vec<(Vec<u8>, Vec<Vec<u8>>)>),
}

impl Pending {
	fn projected_len(&self, cfg: &TableConfig) -> usize {
		match self {
			Pending::Fixed(buf, _) => buf.len(),
			Pending::Variable(groups) => groups
				.iter()
				.map(|(_, recs)| cfg.subkey_ln() as usize + 2 + recs.iter().map(|r| 2 + r.len()).sum::<usize>())
				.sum(),
		}
	}

	fn serialize(&self, cfg: &TableConfig) -> (Vec<u8>, Option<u16>) {
		match self {
			Pending::Fixed(buf, count) => (buf.clone(), Some(*count)),
			Pending::Variable(groups) => {
				let mut out = Vec::with_capacity(self.projected_len(cfg));
				for (subkey, recs) in groups {
					out.extend_from_slice(subkey);
					let body_len: usize = recs.iter().map(|r| 2 + r.len()).sum();
					let mut len_buf = [0u8; 2];
					codec::write_u16(&mut len_buf, body_len as u16);
					out.extend_from_slice(&len_buf);
					for r in recs {
						let mut rlen = [0u8; 2];
						codec::write_u16(&mut rlen, r.len() as u16);
						out.extend_from_slice(&rlen);
						out.extend_from_slice(r);
					}
				}
				(out, None)
			}
		}
	}
}

pub struct BulkWriter {
	root: PathBuf,
	db: String,
	table: String,
	cfg: TableConfig,
	width: LenWidth,
	max_rec_ln: usize,
	reject_sentinel_keys: bool,
	sectors: HashMap<u8, Sector>,
	pending_main_key: Option<[u8; 4]>,
	pending: Option<Pending>,
}

impl BulkWriter {
	pub fn new(root: &Path, db: &str, table: &str, cfg: TableConfig, width: LenWidth) -> BulkWriter {
		BulkWriter {
			root: root.to_path_buf(),
			db: db.to_string(),
			table: table.to_string(),
			cfg,
			width,
			max_rec_ln: MAX_NODE_PAYLOAD - 64,
			reject_sentinel_keys: true,
			sectors: HashMap::new(),
			pending_main_key: None,
			pending: None,
		}
	}

	pub fn with_max_rec_ln(mut self, max_rec_ln: usize) -> BulkWriter {
		self.max_rec_ln = max_rec_ln;
		self
	}

	fn sector_for(&mut self, sector_byte: u8) -> Result<&mut Sector> {
		if !self.sectors.contains_key(&sector_byte) {
			let sector = Sector::open(&self.root, &self.db, &self.table, sector_byte, OpenMode::ReadWrite)?
				.expect("write-mode open always creates the sector");
			self.sectors.insert(sector_byte, sector);
		}
		Ok(self.sectors.get_mut(&sector_byte).unwrap())
	}

	/// Appends one fixed-length record: `len(data)` must equal `rec_ln`.
	pub fn append_fixed(&mut self, key: &[u8], data: &[u8]) -> Result<()> {
		if self.cfg.rec_ln == 0 {
			return Err(Error::BadConfig("table is variable-record, use append_variable".into()));
		}
		if data.len() != self.cfg.rec_ln as usize {
			return Err(Error::SizeExceeded("fixed record length does not match table rec_ln"));
		}
		let (main_key, subkey) = self.split_key(key)?;
		self.flush_if_key_changed(main_key)?;

		let entry_len = subkey.len() + data.len();
		if let Some(Pending::Fixed(buf, _)) = &self.pending {
			if buf.len() + entry_len > MAX_NODE_PAYLOAD {
				self.flush()?;
			}
		}
		match self.pending.get_or_insert_with(|| Pending::Fixed(Vec::new(), 0)) {
			Pending::Fixed(buf, count) => {
				buf.extend_from_slice(subkey);
				buf.extend_from_slice(data);
				*count += 1;
			}
			Pending::Variable(_) => unreachable!("main key transition always flushes first"),
		}
		self.pending_main_key = Some(main_key);
		Ok(())
	}

	/// Appends one variable-length record: `len(data) <= max_rec_ln`.
	pub fn append_variable(&mut self, key: &[u8], data: &[u8]) -> Result<()> {
		if self.cfg.rec_ln != 0 {
			return Err(Error::BadConfig("table is fixed-record, use append_fixed".into()));
		}
		if data.len() > self.max_rec_ln {
			return Err(Error::SizeExceeded("record exceeds max_rec_ln"));
		}
		let (main_key, subkey) = self.split_key(key)?;
		self.flush_if_key_changed(main_key)?;

		let entry_len = subkey.len() + 2 + 2 + data.len();
		let projected = self.pending.as_ref().map_or(0, |p| p.projected_len(&self.cfg));
		if projected > 0 && projected + entry_len > MAX_NODE_PAYLOAD {
			self.flush()?;
		}

		let subkey_vec = subkey.to_vec();
		match self.pending.get_or_insert_with(|| Pending::Variable(Vec::new())) {
			Pending::Variable(groups) => {
				if let Some((last_subkey, recs)) = groups.last_mut() {
					if *last_subkey == subkey_vec {
						recs.push(data.to_vec());
						self.pending_main_key = Some(main_key);
						return Ok(());
					}
				}
				groups.push((subkey_vec, vec![data.to_vec()]));
			}
			Pending::Fixed(_, _) => unreachable!("main key transition always flushes first"),
		}
		self.pending_main_key = Some(main_key);
		Ok(())
	}

	fn split_key<'a>(&self, key: &'a [u8]) -> Result<([u8; 4], &'a [u8])> {
		if key.len() != self.cfg.key_ln as usize {
			return Err(Error::SizeExceeded("key length does not match table key_ln"));
		}
		if self.reject_sentinel_keys && is_sentinel_key(key) {
			return Err(Error::InvalidName("all-zero or MD5-of-empty key is rejected"));
		}
		let main_key: [u8; 4] = key[0..4].try_into().unwrap();
		Ok((main_key, &key[4..]))
	}

	fn flush_if_key_changed(&mut self, main_key: [u8; 4]) -> Result<()> {
		if let Some(current) = self.pending_main_key {
			if current != main_key {
				self.flush()?;
			}
		}
		Ok(())
	}

	/// Flushes any buffered records for the current main key into one
	/// new node. A no-op if nothing is pending.
	pub fn flush(&mut self) -> Result<()> {
		let main_key = match self.pending_main_key.take() {
			Some(k) => k,
			None => return Ok(()),
		};
		let pending = match self.pending.take() {
			Some(p) => p,
			None => return Ok(()),
		};
		let (payload, record_count) = pending.serialize(&self.cfg);
		let sector_byte = main_key[0];
		let cfg = self.cfg.clone();
		let width = self.width;
		let sector = self.sector_for(sector_byte)?;
		node::append(sector, &cfg, width, &main_key, &payload, record_count)?;
		Ok(())
	}

	/// Flushes all remaining buffered records and syncs every touched
	/// sector file to disk.
	pub fn close(mut self) -> Result<()> {
		self.flush()?;
		for (_, sector) in self.sectors.iter_mut() {
			sector.flush()?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::recordset;

	#[test]
	fn sentinel_prefix_matches_md5_of_empty_string() {
		use md5::{Digest, Md5};
		let digest = Md5::digest(b"");
		assert_eq!(&digest[..], &MD5_EMPTY);
	}

	#[test]
	fn rejects_sentinel_keys() {
		let dir = tempfile::tempdir().unwrap();
		crate::path::create_database(dir.path(), "oss").unwrap();
		crate::path::create_table_dir(dir.path(), "oss", "file").unwrap();
		let cfg = TableConfig::new(8, 4, 1).unwrap();
		let mut w = BulkWriter::new(dir.path(), "oss", "file", cfg, LenWidth::U16);
		// Full 8-byte key all-zero, and full 8-byte key matching the MD5("")
		// prefix, are both rejected.
		assert!(w.append_fixed(&[0, 0, 0, 0, 0, 0, 0, 0], b"data").is_err());
		assert!(w.append_fixed(&[0xd4, 0x1d, 0x8c, 0xd9, 0x8f, 0x00, 0xb2, 0x04], b"data").is_err());
	}

	#[test]
	fn does_not_reject_key_whose_main_key_only_collides_with_sentinel() {
		// main_key == MD5("") prefix, but the subkey differs, so the full
		// 8-byte key is neither all-zero nor the MD5-of-empty sentinel.
		let dir = tempfile::tempdir().unwrap();
		crate::path::create_database(dir.path(), "oss").unwrap();
		crate::path::create_table_dir(dir.path(), "oss", "file").unwrap();
		let cfg = TableConfig::new(8, 4, 1).unwrap();
		let mut w = BulkWriter::new(dir.path(), "oss", "file", cfg, LenWidth::U16);
		assert!(w.append_fixed(&[0xd4, 0x1d, 0x8c, 0xd9, 1, 2, 3, 4], b"data").is_ok());
	}

	#[test]
	fn fixed_records_flushed_on_key_change_then_readable() {
		let dir = tempfile::tempdir().unwrap();
		crate::path::create_database(dir.path(), "oss").unwrap();
		crate::path::create_table_dir(dir.path(), "oss", "file").unwrap();
		let cfg = TableConfig::new(8, 4, 1).unwrap();
		let mut w = BulkWriter::new(dir.path(), "oss", "file", cfg.clone(), LenWidth::U16);

		let key_a = [0x01, 0x02, 0x03, 0x04, 0xaa, 0xaa, 0xaa, 0xaa];
		let key_b = [0x05, 0x06, 0x07, 0x08, 0xbb, 0xbb, 0xbb, 0xbb];
		w.append_fixed(&key_a, b"DATA").unwrap();
		w.append_fixed(&key_b, b"DAT2").unwrap(); // different main key, flushes key_a's node
		w.close().unwrap();

		let mut sector = Sector::open(dir.path(), "oss", "file", 0x01, OpenMode::Read).unwrap().unwrap();
		let mut found = Vec::new();
		recordset::fetch(&mut sector, &cfg, LenWidth::U16, &key_a, false, |r| {
			found.push(r.data.to_vec());
			false
		})
		.unwrap();
		assert_eq!(found, vec![[0xaa, 0xaa, 0xaa, 0xaa, b'D', b'A', b'T', b'A']]);
	}

	#[test]
	fn variable_records_group_by_subkey() {
		let dir = tempfile::tempdir().unwrap();
		crate::path::create_database(dir.path(), "oss").unwrap();
		crate::path::create_table_dir(dir.path(), "oss", "file").unwrap();
		let cfg = TableConfig::new(8, 0, 1).unwrap();
		let mut w = BulkWriter::new(dir.path(), "oss", "file", cfg.clone(), LenWidth::U16);

		let key = [0x01, 0x02, 0x03, 0x04, 0xaa, 0xaa, 0xaa, 0xaa];
		w.append_variable(&key, b"one").unwrap();
		w.append_variable(&key, b"two").unwrap();
		w.close().unwrap();

		let mut sector = Sector::open(dir.path(), "oss", "file", 0x01, OpenMode::Read).unwrap().unwrap();
		let mut found = Vec::new();
		recordset::fetch(&mut sector, &cfg, LenWidth::U16, &key, false, |r| {
			found.push(r.data.to_vec());
			false
		})
		.unwrap();
		assert_eq!(found, vec![b"one".to_vec(), b"two".to_vec()]);
	}
}
