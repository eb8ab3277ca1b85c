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

//! Command dispatch for the admin binary (spec.md section 6.3 CLI
//! surface). Gated behind the `admin` feature, same as the teacher's own
//! admin tooling.

use crate::collate::{CollateOptions, DeleteSet, DeleteTuple};
use crate::config::{BulkConfig, TableConfig};
use crate::error::{Error, Result};
use crate::node::LenWidth;
use crate::store::Store;
use std::convert::TryInto;
use std::path::Path;
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "ldb", about = "append-only mapped linked-list key/value store")]
pub struct Options {
	/// Root directory holding one subdirectory per database.
	#[structopt(long, default_value = ".")]
	pub root: String,

	#[structopt(subcommand)]
	pub command: Command,
}

#[derive(StructOpt, Debug)]
pub enum Command {
	/// create database <name>
	CreateDatabase { db: String },
	/// create table <db>/<table> <key_ln> <rec_ln> <keys>
	CreateTable { db: String, table: String, key_ln: u8, rec_ln: u8, keys: u8 },
	/// show databases
	ShowDatabases,
	/// show tables from <db>
	ShowTables { db: String },
	/// select ... csv hex <key-hex>
	Select { db: String, table: String, key_hex: String },
	/// insert into <db>/<t> key <hex> (ascii|hex) <data>
	Insert { db: String, table: String, key_hex: String, encoding: String, data: String },
	/// bulk insert <db>[/<t>] from <path>
	BulkInsert { db: String, table: String, path: String },
	/// dump <db>/<t> hex <n> [sector <hex>]
	Dump { db: String, table: String, n: usize, sector: Option<String> },
	/// dump keys from <db>/<t> [sector <hex>]
	DumpKeys { db: String, table: String, sector: Option<String> },
	/// unlink list from <db>/<t> key <key-hex>
	Unlink { db: String, table: String, key_hex: String },
	/// collate <db>/<t>
	Collate { db: String, table: String },
	/// merge <db>/<t1> into <db2>/<t2>
	Merge { src_db: String, src_table: String, dest_db: String, dest_table: String },
	/// delete from <db>/<t> key <key-hex>
	Delete { db: String, table: String, key_hex: String },
	/// mz cat <db>/<t> <hash-hex>
	MzCat { db: String, table: String, hash_hex: String },
	/// mz insert <db>/<t> <hash-hex> from a file
	MzInsert { db: String, table: String, hash_hex: String, file: String },
	/// mz collate <db>/<t> <file-id-hex>
	MzCollate { db: String, table: String, mz_id_hex: String },
	/// checksum <db>/<t> <sector-hex>
	Checksum { db: String, table: String, sector_hex: String },
	/// version
	Version,
}

fn parse_hash16(hex: &str) -> Result<[u8; 16]> {
	let bytes = crate::codec::unhex(hex)?;
	bytes.try_into().map_err(|_| Error::SizeExceeded("hash must be exactly 16 bytes"))
}

fn parse_sector(sector_hex: Option<&str>) -> Result<Option<u8>> {
	match sector_hex {
		Some(hex) => {
			let bytes = crate::codec::unhex(hex)?;
			let b = *bytes.first().ok_or(Error::InvalidName("sector must be one byte"))?;
			Ok(Some(b))
		}
		None => Ok(None),
	}
}

/// Dispatches one parsed `Command` against `store`, returning the lines
/// to print to stdout.
pub fn run(store: &Store, command: Command) -> Result<Vec<String>> {
	match command {
		Command::CreateDatabase { db } => {
			store.create_database(&db)?;
			Ok(vec![format!("database {} created", db)])
		}
		Command::CreateTable { db, table, key_ln, rec_ln, keys } => {
			let cfg = TableConfig::new(key_ln, rec_ln, keys)?;
			store.create_table(&db, &table, cfg)?;
			Ok(vec![format!("table {}/{} created", db, table)])
		}
		Command::ShowDatabases => store.show_databases(),
		Command::ShowTables { db } => store.show_tables(&db),
		Command::Select { db, table, key_hex } => {
			let key = crate::codec::unhex(&key_hex)?;
			store.select_csv_hex(&db, &table, &key)
		}
		Command::Insert { db, table, key_hex, encoding, data } => {
			let key = crate::codec::unhex(&key_hex)?;
			let payload = match encoding.as_str() {
				"ascii" => data.into_bytes(),
				"hex" => crate::codec::unhex(&data)?,
				other => return Err(Error::BadConfig(format!("unknown encoding: {}", other))),
			};
			store.insert(&db, &table, &key, &payload)?;
			Ok(vec!["ok".to_string()])
		}
		Command::BulkInsert { db, table, path } => {
			let opts = BulkConfig::load_or_default(store.root(), &db);
			let count = store.bulk_insert(&db, &table, Path::new(&path), &opts)?;
			Ok(vec![format!("{} records inserted", count)])
		}
		Command::Dump { db, table, n, sector } => {
			let sector_byte = parse_sector(sector.as_deref())?;
			store.dump_hex(&db, &table, n, sector_byte)
		}
		Command::DumpKeys { db, table, sector } => {
			let sector_byte = parse_sector(sector.as_deref())?;
			store.dump_keys(&db, &table, sector_byte)
		}
		Command::Unlink { db, table, key_hex } => {
			let key = crate::codec::unhex(&key_hex)?;
			store.unlink(&db, &table, &key)?;
			Ok(vec!["ok".to_string()])
		}
		Command::Collate { db, table } => {
			let stats = store.collate(&db, &table, &CollateOptions::default())?;
			Ok(vec![format!("{:?}", stats)])
		}
		Command::Merge { src_db, src_table, dest_db, dest_table } => {
			let stats = store.merge(&src_db, &src_table, &dest_db, &dest_table, &CollateOptions::default())?;
			Ok(vec![format!("{:?}", stats)])
		}
		Command::Delete { db, table, key_hex } => {
			let key = crate::codec::unhex(&key_hex)?;
			let tuples = DeleteSet::new(vec![DeleteTuple { key, text: None }]);
			let stats = store.delete(&db, &table, tuples, &CollateOptions::default())?;
			Ok(vec![format!("{:?}", stats)])
		}
		Command::MzCat { db, table, hash_hex } => {
			let hash = parse_hash16(&hash_hex)?;
			match store.mz_cat(&db, &table, &hash)? {
				Some(data) => Ok(vec![crate::codec::hex(&data)]),
				None => Ok(vec![]),
			}
		}
		Command::MzInsert { db, table, hash_hex, file } => {
			let hash = parse_hash16(&hash_hex)?;
			let data = std::fs::read(file)?;
			store.mz_insert(&db, &table, &hash, &data)?;
			Ok(vec!["ok".to_string()])
		}
		Command::MzCollate { db, table, mz_id_hex } => {
			let bytes = crate::codec::unhex(&mz_id_hex)?;
			let mz_id = (bytes.first().copied().unwrap_or(0) as u16) << 8 | bytes.get(1).copied().unwrap_or(0) as u16;
			let report = store.mz_collate(&db, &table, mz_id)?;
			Ok(vec![format!("{:?}", report)])
		}
		Command::Checksum { db, table, sector_hex } => {
			let bytes = crate::codec::unhex(&sector_hex)?;
			let sector_byte = *bytes.first().ok_or(crate::error::Error::InvalidName("sector must be one byte"))?;
			match store.sector_checksum(&db, &table, sector_byte)? {
				Some(crc) => Ok(vec![format!("{:08x}", crc)]),
				None => Ok(vec![]),
			}
		}
		Command::Version => Ok(vec![env!("CARGO_PKG_VERSION").to_string()]),
	}
}

pub fn len_width_from_env() -> LenWidth {
	match std::env::var("LDB_NODE_LEN_WIDTH").as_deref() {
		Ok("32") => LenWidth::U32,
		_ => LenWidth::U16,
	}
}
