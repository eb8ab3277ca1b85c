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

//! End-to-end scenarios exercising a `Store` the way a caller would,
//! without reaching into any engine module directly.

use ldb::collate::CollateOptions;
use ldb::config::TableConfig;
use ldb::store::Store;

#[test]
fn create_database_and_table_then_list_it() {
	let dir = tempfile::tempdir().unwrap();
	let store = Store::open(dir.path());
	store.create_database("oss").unwrap();
	store.create_table("oss", "file", TableConfig::new(8, 0, 1).unwrap()).unwrap();

	assert_eq!(store.show_databases().unwrap(), vec!["oss".to_string()]);
	assert_eq!(store.show_tables("oss").unwrap(), vec!["file".to_string()]);
}

#[test]
fn insert_then_select_returns_csv_hex_line() {
	let dir = tempfile::tempdir().unwrap();
	let store = Store::open(dir.path());
	store.create_database("oss").unwrap();
	store.create_table("oss", "file", TableConfig::new(8, 0, 1).unwrap()).unwrap();

	let key = [0x01, 0x02, 0x03, 0x04, 0xaa, 0xbb, 0xcc, 0xdd];
	let mut w = store.bulk_writer("oss", "file").unwrap();
	w.append_variable(&key, b"hello").unwrap();
	w.close().unwrap();

	let lines = store.select_csv_hex("oss", "file", &key).unwrap();
	assert_eq!(lines.len(), 1);
	assert!(lines[0].starts_with(&hex::encode(key)));
	assert!(lines[0].ends_with(&format!("{},", hex::encode(b"hello"))));
}

#[test]
fn collate_sorts_records_across_main_keys() {
	let dir = tempfile::tempdir().unwrap();
	let store = Store::open(dir.path());
	store.create_database("oss").unwrap();
	store.create_table("oss", "file", TableConfig::new(8, 0, 1).unwrap()).unwrap();

	let key_b = [0x01, 0x02, 0x03, 0x04, 2, 2, 2, 2];
	let key_a = [0x01, 0x02, 0x03, 0x04, 1, 1, 1, 1];
	let mut w = store.bulk_writer("oss", "file").unwrap();
	w.append_variable(&key_b, b"second").unwrap();
	w.append_variable(&key_a, b"first").unwrap();
	w.close().unwrap();

	store.collate("oss", "file", &CollateOptions::default()).unwrap();

	assert_eq!(store.select_csv_hex("oss", "file", &key_a).unwrap().len(), 1);
	assert_eq!(store.select_csv_hex("oss", "file", &key_b).unwrap().len(), 1);
}

#[test]
fn collate_drops_exact_duplicates() {
	let dir = tempfile::tempdir().unwrap();
	let store = Store::open(dir.path());
	store.create_database("oss").unwrap();
	store.create_table("oss", "file", TableConfig::new(8, 0, 1).unwrap()).unwrap();

	let key = [0x09, 0x09, 0x09, 0x09, 7, 7, 7, 7];
	let mut w = store.bulk_writer("oss", "file").unwrap();
	w.append_variable(&key, b"same").unwrap();
	w.append_variable(&key, b"same").unwrap();
	w.close().unwrap();

	let stats = store.collate("oss", "file", &CollateOptions::default()).unwrap();
	assert_eq!(stats.deduped, 1);
	assert_eq!(store.select_csv_hex("oss", "file", &key).unwrap().len(), 1);
}

#[test]
fn unlink_is_lazy_until_next_collate() {
	let dir = tempfile::tempdir().unwrap();
	let store = Store::open(dir.path());
	store.create_database("oss").unwrap();
	store.create_table("oss", "file", TableConfig::new(8, 0, 1).unwrap()).unwrap();

	let key = [0x05, 0x05, 0x05, 0x05, 1, 1, 1, 1];
	let mut w = store.bulk_writer("oss", "file").unwrap();
	w.append_variable(&key, b"data").unwrap();
	w.close().unwrap();

	let sector_path = dir.path().join("oss").join("file").join("05.ldb");
	let size_before = std::fs::metadata(&sector_path).unwrap().len();

	store.unlink("oss", "file", &key).unwrap();
	assert!(!store.key_exists("oss", "file", &key).unwrap());
	// Lazy delete: the node bytes are still there until a collate rewrites
	// the sector, so file size is unchanged.
	assert_eq!(std::fs::metadata(&sector_path).unwrap().len(), size_before);
}

#[test]
fn mz_insert_cat_and_collate_is_idempotent() {
	let dir = tempfile::tempdir().unwrap();
	let store = Store::open(dir.path());
	store.create_database("oss").unwrap();
	store.create_table("oss", "mz", TableConfig::new(16, 0, 1).unwrap()).unwrap();

	let hash = [0x11u8; 16];
	store.mz_insert("oss", "mz", &hash, b"compressed me").unwrap();
	assert_eq!(store.mz_cat("oss", "mz", &hash).unwrap(), Some(b"compressed me".to_vec()));
	assert!(store.mz_exists("oss", "mz", &hash).unwrap());

	let mz_id = ((hash[0] as u16) << 8) | hash[1] as u16;
	let first = store.mz_collate("oss", "mz", mz_id).unwrap();
	let second = store.mz_collate("oss", "mz", mz_id).unwrap();
	assert_eq!(first.dup, 0);
	assert_eq!(second.dup, 0);
	assert_eq!(store.mz_cat("oss", "mz", &hash).unwrap(), Some(b"compressed me".to_vec()));
}
