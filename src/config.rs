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

//! Per-table metadata (spec.md section 4.3) and the per-database bulk
//! import config file (spec.md section 6.4).

use crate::error::{Error, Result};
use crate::path;
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

bitflags::bitflags! {
	/// Bitset stored in a table's cfg `flags` field.
	pub struct TableFlags: u32 {
		const STANDARD   = 0b0000;
		const ENCRYPTED  = 0b0001;
		const MZ         = 0b0010;
		const COMPRESSED = 0b0100;
	}
}

/// Sentinel written by the original tool when the cfg line predates the
/// `keys`/`flags` fields; kept distinct from a real `keys=1` so callers
/// can tell "explicitly one key" from "file predates this field".
const UNDEFINED: i32 = -1;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableConfig {
	pub key_ln: u8,
	/// 0 means variable-length records.
	pub rec_ln: u8,
	pub keys: u8,
	pub flags: TableFlags,
}

impl Default for TableConfig {
	fn default() -> Self {
		TableConfig { key_ln: 16, rec_ln: 0, keys: 1, flags: TableFlags::STANDARD }
	}
}

impl TableConfig {
	pub fn new(key_ln: u8, rec_ln: u8, keys: u8) -> Result<Self> {
		if !(4..=255).contains(&key_ln) {
			return Err(Error::BadConfig(format!("key_ln {} out of range 4..255", key_ln)));
		}
		if keys == 0 {
			return Err(Error::BadConfig("keys must be >= 1".into()));
		}
		Ok(TableConfig { key_ln, rec_ln, keys, flags: TableFlags::STANDARD })
	}

	pub fn subkey_ln(&self) -> u8 {
		self.key_ln - 4
	}

	pub fn variable(&self) -> bool {
		self.rec_ln == 0
	}

	/// Parses `key_ln,rec_ln,keys,flags`. Missing trailing fields default
	/// to `keys=1, flags=STANDARD` with a warning, matching the original
	/// `fscanf`-based reader's backward-compatibility behavior (it treats
	/// a short read as "file predates these fields", not corruption).
	pub fn parse(line: &str) -> Result<TableConfig> {
		let fields: Vec<&str> = line.trim().split(',').map(|s| s.trim()).collect();
		if fields.len() < 2 {
			return Err(Error::BadConfig("cfg line needs at least key_ln,rec_ln".into()));
		}
		let key_ln: i32 = fields[0].parse().map_err(|_| Error::BadConfig("key_ln not a number".into()))?;
		let rec_ln: i32 = fields[1].parse().map_err(|_| Error::BadConfig("rec_ln not a number".into()))?;
		if !(4..=255).contains(&key_ln) {
			return Err(Error::BadConfig(format!("key_ln {} out of range 4..255", key_ln)));
		}
		if !(0..=255).contains(&rec_ln) {
			return Err(Error::BadConfig(format!("rec_ln {} out of range 0..255", rec_ln)));
		}

		let (keys, flags) = if fields.len() >= 4 {
			let keys: i32 = fields[2].parse().unwrap_or(UNDEFINED);
			let flags: i32 = fields[3].parse().unwrap_or(UNDEFINED);
			(keys, flags)
		} else {
			log::warn!(target: "ldb", "cfg line missing keys/flags fields, using defaults: {}", line);
			(UNDEFINED, UNDEFINED)
		};

		let keys = if keys <= 0 { 1 } else { keys as u8 };
		let flags = if flags < 0 { TableFlags::STANDARD } else { TableFlags::from_bits_truncate(flags as u32) };

		Ok(TableConfig { key_ln: key_ln as u8, rec_ln: rec_ln as u8, keys, flags })
	}

	pub fn to_line(&self) -> String {
		format!("{},{},{},{}", self.key_ln, self.rec_ln, self.keys, self.flags.bits())
	}

	pub fn load(root: &Path, db: &str, table: &str) -> Result<TableConfig> {
		let path = path::table_cfg_path(root, db, table)?;
		let text = std::fs::read_to_string(&path).map_err(|_| {
			Error::NotFound(format!("config for {}/{}", db, table))
		})?;
		Self::parse(&text)
	}

	pub fn write(&self, root: &Path, db: &str, table: &str) -> Result<()> {
		let path = path::table_cfg_path(root, db, table)?;
		let mut file = std::fs::File::create(path)?;
		file.write_all(self.to_line().as_bytes())?;
		Ok(())
	}
}

/// One table's entry in a `<db>.conf` bulk-import config file
/// (spec.md section 6.4): a loose bag of key=value options, since the
/// set of recognized keys is owned by the (out-of-scope) importer, not
/// by the storage engine.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BulkOptions(pub HashMap<String, String>);

impl BulkOptions {
	pub fn get(&self, key: &str) -> Option<&str> {
		self.0.get(key).map(|s| s.as_str())
	}

	pub fn get_usize(&self, key: &str) -> Option<usize> {
		self.get(key).and_then(|v| v.parse().ok())
	}

	pub fn flag(&self, key: &str) -> bool {
		matches!(self.get(key), Some("1") | Some("true") | Some("TRUE"))
	}
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BulkConfig {
	pub global: BulkOptions,
	pub tables: HashMap<String, BulkOptions>,
}

impl BulkConfig {
	/// Defaults materialized when `<root>/<db>.conf` does not exist, per
	/// spec.md section 6.4 and `src/config.c`'s built-in table list.
	pub fn defaults() -> BulkConfig {
		let mut global = HashMap::new();
		global.insert("MAX_RECORD".to_string(), "2048".to_string());
		global.insert("TMP_PATH".to_string(), "/tmp".to_string());

		let mut tables = HashMap::new();
		let mut sources = HashMap::new();
		sources.insert("MZ".to_string(), "1".to_string());
		tables.insert("sources".to_string(), BulkOptions(sources));

		let mut file = HashMap::new();
		file.insert("KEYS".to_string(), "2".to_string());
		file.insert("FIELDS".to_string(), "3".to_string());
		tables.insert("file".to_string(), BulkOptions(file));

		let mut wfp = HashMap::new();
		wfp.insert("WFP".to_string(), "1".to_string());
		tables.insert("wfp".to_string(), BulkOptions(wfp));

		BulkConfig { global: BulkOptions(global), tables }
	}

	pub fn load_or_default(root: &Path, db: &str) -> BulkConfig {
		let path = root.join(format!("{}.conf", db));
		match std::fs::read_to_string(&path) {
			Ok(text) => Self::parse(&text),
			Err(_) => {
				log::info!(target: "ldb", "no bulk-import config for {}, using defaults", db);
				Self::defaults()
			}
		}
	}

	/// `TABLE: (K=V, K=V, ...)` grammar, one entry per line; `GLOBAL:`
	/// is a pseudo-table name for defaults applying to every table.
	pub fn parse(text: &str) -> BulkConfig {
		let mut global = HashMap::new();
		let mut tables = HashMap::new();
		for line in text.lines() {
			let line = line.trim();
			if line.is_empty() || line.starts_with('#') {
				continue;
			}
			let (name, rest) = match line.split_once(':') {
				Some(pair) => pair,
				None => continue,
			};
			let name = name.trim();
			let rest = rest.trim().trim_start_matches('(').trim_end_matches(')');
			let mut opts = HashMap::new();
			for kv in rest.split(',') {
				if let Some((k, v)) = kv.split_once('=') {
					opts.insert(k.trim().to_string(), v.trim().to_string());
				}
			}
			if name.eq_ignore_ascii_case("GLOBAL") {
				global.extend(opts);
			} else {
				tables.insert(name.to_string(), BulkOptions(opts));
			}
		}
		BulkConfig { global: BulkOptions(global), tables }
	}

	pub fn options_for(&self, table: &str) -> BulkOptions {
		let mut merged = self.global.0.clone();
		if let Some(specific) = self.tables.get(table) {
			merged.extend(specific.0.clone());
		}
		BulkOptions(merged)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn parses_full_line() {
		let cfg = TableConfig::parse("16,0,2,1").unwrap();
		assert_eq!(cfg, TableConfig { key_ln: 16, rec_ln: 0, keys: 2, flags: TableFlags::ENCRYPTED });
		assert_eq!(cfg.subkey_ln(), 12);
		assert!(cfg.variable());
	}

	#[test]
	fn defaults_short_line_with_warning() {
		let cfg = TableConfig::parse("16,4").unwrap();
		assert_eq!(cfg.keys, 1);
		assert_eq!(cfg.flags, TableFlags::STANDARD);
		assert!(!cfg.variable());
	}

	#[test]
	fn rejects_out_of_range_key_ln() {
		assert!(TableConfig::parse("3,4,1,0").is_err());
		assert!(TableConfig::parse("256,4,1,0").is_err());
	}

	#[test]
	fn roundtrip_write_load() {
		let dir = tempfile::tempdir().unwrap();
		path::create_database(dir.path(), "oss").unwrap();
		let cfg = TableConfig::new(16, 0, 1).unwrap();
		cfg.write(dir.path(), "oss", "file").unwrap();
		let loaded = TableConfig::load(dir.path(), "oss", "file").unwrap();
		assert_eq!(cfg, loaded);
	}

	#[test]
	fn bulk_config_defaults() {
		let cfg = BulkConfig::defaults();
		assert_eq!(cfg.options_for("sources").get("MZ"), Some("1"));
		assert_eq!(cfg.global.get("MAX_RECORD"), Some("2048"));
	}

	#[test]
	fn bulk_config_parses_global_and_table() {
		let text = "GLOBAL: (MAX_RECORD=4096)\nfile: (KEYS=2, FIELDS=3)\n";
		let cfg = BulkConfig::parse(text);
		let opts = cfg.options_for("file");
		assert_eq!(opts.get("MAX_RECORD"), Some("4096"));
		assert_eq!(opts.get_usize("KEYS"), Some(2));
	}
}
