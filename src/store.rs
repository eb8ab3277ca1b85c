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

//! Top-level handle (spec.md section 9's "encapsulate global mutable
//! state" redesign hint): one `Store` owns a root directory, an optional
//! payload decoder, and the node length-field width used for every
//! table it touches, instead of the original's process-global statics.

use crate::collate::{self, CollateOptions, CollateStats, DeleteSet};
use crate::config::{BulkConfig, TableConfig};
use crate::decoder::Decoder;
use crate::error::{Error, Result};
use std::convert::TryInto;
use crate::lock::TableLock;
use crate::mz::{self, CollateReport};
use crate::node::LenWidth;
use crate::path;
use crate::recordset;
use crate::sector::{self, OpenMode, Sector};
use crate::write::BulkWriter;
use std::path::{Path, PathBuf};

pub struct Store {
	root: PathBuf,
	width: LenWidth,
	decoder: Option<Box<dyn Decoder>>,
}

impl Store {
	pub fn open(root: impl AsRef<Path>) -> Store {
		Store { root: root.as_ref().to_path_buf(), width: LenWidth::U16, decoder: None }
	}

	pub fn with_len_width(mut self, width: LenWidth) -> Store {
		self.width = width;
		self
	}

	pub fn with_decoder(mut self, decoder: Box<dyn Decoder>) -> Store {
		self.decoder = Some(decoder);
		self
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn create_database(&self, db: &str) -> Result<()> {
		path::create_database(&self.root, db)
	}

	pub fn create_table(&self, db: &str, table: &str, cfg: TableConfig) -> Result<()> {
		path::create_table_dir(&self.root, db, table)?;
		cfg.write(&self.root, db, table)
	}

	pub fn show_databases(&self) -> Result<Vec<String>> {
		path::show_databases(&self.root)
	}

	pub fn show_tables(&self, db: &str) -> Result<Vec<String>> {
		path::show_tables(&self.root, db)
	}

	pub fn table_config(&self, db: &str, table: &str) -> Result<TableConfig> {
		TableConfig::load(&self.root, db, table)
	}

	/// Returns a writer that buffers and flushes bulk-insert records for
	/// one table (spec.md section 4.10).
	pub fn bulk_writer(&self, db: &str, table: &str) -> Result<BulkWriter> {
		let cfg = self.table_config(db, table)?;
		Ok(BulkWriter::new(&self.root, db, table, cfg, self.width))
	}

	/// `insert into <db>/<t> key <hex> (ascii|hex) <data>`: writes one
	/// record through the same `BulkWriter` path a bulk import drives,
	/// picking fixed vs variable append by the table's `rec_ln`.
	pub fn insert(&self, db: &str, table: &str, key: &[u8], data: &[u8]) -> Result<()> {
		let cfg = self.table_config(db, table)?;
		let mut w = BulkWriter::new(&self.root, db, table, cfg.clone(), self.width);
		if cfg.rec_ln > 0 {
			w.append_fixed(key, data)?;
		} else {
			w.append_variable(key, data)?;
		}
		w.close()
	}

	/// `bulk insert <db>[/<t>] from <path>`: one `<key_hex><delim><data_hex>`
	/// record per line, the minimal contract the write API commits to
	/// (spec.md section 1 scopes the CSV bulk-import driver itself, with
	/// its field layouts and per-column options, as an out-of-scope
	/// external collaborator). `CSV_DEL` from the table's bulk-import
	/// options picks the delimiter, defaulting to `,`.
	pub fn bulk_insert(&self, db: &str, table: &str, path: &Path, opts: &BulkConfig) -> Result<usize> {
		let cfg = self.table_config(db, table)?;
		let table_opts = opts.options_for(table);
		let delim = table_opts.get("CSV_DEL").and_then(|d| d.chars().next()).unwrap_or(',');
		let text = std::fs::read_to_string(path)?;

		let mut w = BulkWriter::new(&self.root, db, table, cfg.clone(), self.width);
		let mut count = 0usize;
		for line in text.lines() {
			let line = line.trim();
			if line.is_empty() {
				continue;
			}
			let (key_hex, data_hex) = line
				.split_once(delim)
				.ok_or_else(|| Error::BadFormat("bulk insert line missing key/data delimiter"))?;
			let key = crate::codec::unhex(key_hex)?;
			let data = crate::codec::unhex(data_hex)?;
			if cfg.rec_ln > 0 {
				w.append_fixed(&key, &data)?;
			} else {
				w.append_variable(&key, &data)?;
			}
			count += 1;
		}
		w.close()?;
		Ok(count)
	}

	/// `dump <db>/<t> hex <n> [sector <hex>]`: every record across the
	/// requested sector (or all 256 if none is given), in on-disk order.
	pub fn dump_hex(&self, db: &str, table: &str, hex_bytes: usize, sector_byte: Option<u8>) -> Result<Vec<String>> {
		let cfg = self.table_config(db, table)?;
		let mut lines = Vec::new();
		for sb in self.sectors_to_scan(sector_byte) {
			if let Some(mut sector) = Sector::open(&self.root, db, table, sb, OpenMode::Read)? {
				for main_key in sector::main_keys(&mut sector, sb)? {
					lines.extend(recordset::dump_hex_lines(&mut sector, &cfg, self.width, &main_key, hex_bytes)?);
				}
			}
		}
		Ok(lines)
	}

	/// `dump keys from <db>/<t> [sector <hex>]`: every distinct key across
	/// the requested sector (or all 256 if none is given).
	pub fn dump_keys(&self, db: &str, table: &str, sector_byte: Option<u8>) -> Result<Vec<String>> {
		let cfg = self.table_config(db, table)?;
		let mut keys = Vec::new();
		for sb in self.sectors_to_scan(sector_byte) {
			if let Some(mut sector) = Sector::open(&self.root, db, table, sb, OpenMode::Read)? {
				for main_key in sector::main_keys(&mut sector, sb)? {
					keys.extend(recordset::dump_keys(&mut sector, &cfg, self.width, &main_key)?);
				}
			}
		}
		Ok(keys)
	}

	fn sectors_to_scan(&self, sector_byte: Option<u8>) -> Vec<u8> {
		match sector_byte {
			Some(b) => vec![b],
			None => (0u16..256).map(|v| v as u8).collect(),
		}
	}

	/// `select ... csv hex <n>`: every record under `key`, hex-encoded.
	pub fn select_csv_hex(&self, db: &str, table: &str, key: &[u8]) -> Result<Vec<String>> {
		let cfg = self.table_config(db, table)?;
		let sector_byte = key[0];
		match Sector::open(&self.root, db, table, sector_byte, OpenMode::Read)? {
			Some(mut sector) => recordset::csv_hex_lines(&mut sector, &cfg, self.width, key),
			None => Ok(Vec::new()),
		}
	}

	pub fn key_exists(&self, db: &str, table: &str, key: &[u8]) -> Result<bool> {
		let cfg = self.table_config(db, table)?;
		match Sector::open(&self.root, db, table, key[0], OpenMode::Read)? {
			Some(mut sector) => recordset::key_exists(&mut sector, &cfg, self.width, key),
			None => Ok(false),
		}
	}

	/// `unlink list from <db>/<t> key <hex>`: clears the map slot only;
	/// the list's nodes remain on disk until the next collate.
	pub fn unlink(&self, db: &str, table: &str, key: &[u8]) -> Result<()> {
		let main_key: [u8; 4] = key[0..4].try_into().map_err(|_| Error::SizeExceeded("key shorter than 4 bytes"))?;
		match Sector::open(&self.root, db, table, main_key[0], OpenMode::ReadWrite)? {
			Some(mut sector) => crate::node::unlink(&mut sector, &main_key),
			None => Ok(()),
		}
	}

	pub fn collate(&self, db: &str, table: &str, opts: &CollateOptions) -> Result<CollateStats> {
		let cfg = self.table_config(db, table)?;
		let _guard = self.lock_table(db, table)?;
		collate::collate_table(&self.root, db, table, &cfg, self.width, opts)
	}

	/// `merge <db>/<t1> into <db>/<t2>`: requires both tables share
	/// `key_ln`/`rec_ln` (spec.md section 4.8).
	pub fn merge(&self, src_db: &str, src_table: &str, dest_db: &str, dest_table: &str, opts: &CollateOptions) -> Result<CollateStats> {
		let src_cfg = self.table_config(src_db, src_table)?;
		let dest_cfg = self.table_config(dest_db, dest_table)?;
		if src_cfg.key_ln != dest_cfg.key_ln || src_cfg.rec_ln != dest_cfg.rec_ln {
			return Err(Error::BadConfig("merge requires matching key_ln and rec_ln".into()));
		}
		let _src_guard = self.lock_table(src_db, src_table)?;
		let _dest_guard = self.lock_table(dest_db, dest_table)?;
		collate::merge_table(&self.root, src_db, src_table, dest_db, dest_table, &src_cfg, self.width, opts)
	}

	pub fn delete(&self, db: &str, table: &str, tuples: DeleteSet, opts: &CollateOptions) -> Result<CollateStats> {
		let cfg = self.table_config(db, table)?;
		let _guard = self.lock_table(db, table)?;
		collate::delete_table(&self.root, db, table, &cfg, self.width, &tuples, self.decoder.as_deref(), opts)
	}

	fn lock_table(&self, db: &str, table: &str) -> Result<TableLock> {
		TableLock::acquire(&self.root, db, table)
	}

	pub fn mz_insert(&self, db: &str, table: &str, hash: &[u8; 16], data: &[u8]) -> Result<()> {
		let cfg = self.table_config(db, table)?;
		let mut writer = mz::MzWriter::new(&self.root, db, table, cfg.flags.contains(crate::config::TableFlags::ENCRYPTED));
		writer.insert(hash, data)?;
		writer.close()
	}

	pub fn mz_cat(&self, db: &str, table: &str, hash: &[u8; 16]) -> Result<Option<Vec<u8>>> {
		let cfg = self.table_config(db, table)?;
		mz::cat(&self.root, db, table, hash, cfg.flags.contains(crate::config::TableFlags::ENCRYPTED))
	}

	pub fn mz_exists(&self, db: &str, table: &str, hash: &[u8; 16]) -> Result<bool> {
		let cfg = self.table_config(db, table)?;
		mz::exists(&self.root, db, table, hash, cfg.flags.contains(crate::config::TableFlags::ENCRYPTED))
	}

	pub fn mz_collate(&self, db: &str, table: &str, mz_id: u16) -> Result<CollateReport> {
		let cfg = self.table_config(db, table)?;
		mz::collate_file(&self.root, db, table, mz_id, cfg.flags.contains(crate::config::TableFlags::ENCRYPTED))
	}

	/// `checksum <db>/<t> <sector-hex>`: CRC32 of one sector file, for spot
	/// checks between a source and a migrated copy. Not part of the wire
	/// format and not read back by any engine path.
	pub fn sector_checksum(&self, db: &str, table: &str, sector_byte: u8) -> Result<Option<u32>> {
		match Sector::open(&self.root, db, table, sector_byte, OpenMode::Read)? {
			Some(mut sector) => Ok(Some(crc32fast::hash(&sector.load()?))),
			None => Ok(None),
		}
	}
}
