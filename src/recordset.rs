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

//! Recordset fetch (spec.md section 4.7): walks one key's list, yielding
//! logical records to a caller-supplied handler closure. This replaces
//! the original's `void *` context pointer + function pointer pair with
//! an `FnMut` closure, per the redesign hint in spec.md section 9.

use crate::codec;
use crate::config::TableConfig;
use crate::error::Result;
use crate::node::{self, LenWidth};
use std::convert::TryInto;
use crate::sector::{OpenMode, Sector};
use std::path::Path;

/// Records whose declared length would come within 32 bytes of the
/// absolute node cap are dropped defensively rather than trusted: a
/// corrupted length field cannot then drive an out-of-bounds read.
/// Matches the original's `record_size + 32 < LDB_MAX_REC_LN` guard.
const DROP_MARGIN: usize = 32;
const LDB_MAX_REC_LN: usize = 65_535;

/// One logical record surfaced to a fetch handler.
pub struct Record<'a> {
	pub main_key: &'a [u8; 4],
	/// `None` in fixed-record mode, where the handler receives an entire
	/// node's payload instead of per-record slices (spec.md section 4.7).
	pub subkey: Option<&'a [u8]>,
	pub data: &'a [u8],
	pub index: usize,
}

/// Iterates logical records under `main_key ++ subkey`. `handler` returns
/// `true` to stop early. Returns the number of records yielded.
///
/// `skip_subkey` accepts every subkey group under the main key instead of
/// filtering to the one named by `key`; fixed-record tables ignore it
/// since there is no subkey grouping at the node level.
pub fn fetch<F>(sector: &mut Sector, cfg: &TableConfig, width: LenWidth, key: &[u8], skip_subkey: bool, mut handler: F) -> Result<usize>
where
	F: FnMut(Record) -> bool,
{
	let main_key: [u8; 4] = key[0..4].try_into().unwrap();
	let subkey_ln = cfg.subkey_ln() as usize;
	let subkey = &key[4..4 + subkey_ln];

	let mut next = match node::list_head(sector, &main_key)? {
		Some((first, _last)) => first,
		None => return Ok(0),
	};

	let mut count = 0usize;
	let mut done = false;

	while next != 0 && !done {
		let (header, payload) = match node::read_node(sector, cfg, width, next) {
			Ok(v) => v,
			Err(e) => {
				log::warn!(target: "ldb", "stopping traversal: failed to read node at {}: {}", next, e);
				break;
			}
		};

		if cfg.rec_ln > 0 {
			done = handler(Record { main_key: &main_key, subkey: None, data: &payload, index: count });
			count += 1;
		} else {
			if !node::validate_variable_payload(&payload, subkey_ln) {
				log::warn!(target: "ldb", "skipping corrupted variable-record node at {}", next);
				next = header.next;
				continue;
			}
			let mut pos = 0usize;
			while pos < payload.len() && !done {
				let group_subkey = &payload[pos..pos + subkey_ln];
				pos += subkey_ln;
				let group_size = codec::read_u16(&payload[pos..pos + 2])? as usize;
				pos += 2;
				let group_end = pos + group_size;

				let matched = skip_subkey || subkey_ln == 0 || group_subkey == subkey;
				if matched {
					let mut gp = pos;
					while gp < group_end && !done {
						let rec_size = codec::read_u16(&payload[gp..gp + 2])? as usize;
						gp += 2;
						if rec_size + DROP_MARGIN < LDB_MAX_REC_LN {
							done = handler(Record {
								main_key: &main_key,
								subkey: Some(group_subkey),
								data: &payload[gp..gp + rec_size],
								index: count,
							});
							count += 1;
						} else {
							log::warn!(target: "ldb", "dropping oversized record ({} bytes) during fetch", rec_size);
						}
						gp += rec_size;
					}
				}
				pos = group_end;
			}
		}

		next = header.next;
	}

	Ok(count)
}

/// Opens the sector from disk (if not already open) and fetches, exactly
/// as `ldb_fetch_recordset(NULL, ...)` does in the original.
pub fn fetch_from_disk<F>(root: &Path, db: &str, table: &str, cfg: &TableConfig, width: LenWidth, key: &[u8], skip_subkey: bool, handler: F) -> Result<usize>
where
	F: FnMut(Record) -> bool,
{
	let sector_byte = key[0];
	match Sector::open(root, db, table, sector_byte, OpenMode::Read)? {
		Some(mut sector) => fetch(&mut sector, cfg, width, key, skip_subkey, handler),
		None => Ok(0),
	}
}

/// `ldb_key_exists`: true if at least one record exists for `key`.
pub fn key_exists(sector: &mut Sector, cfg: &TableConfig, width: LenWidth, key: &[u8]) -> Result<bool> {
	let mut found = false;
	fetch(sector, cfg, width, key, false, |_| {
		found = true;
		true
	})?;
	Ok(found)
}

/// `ldb_get_first_record`: returns the first matching record's bytes, if any.
pub fn first_record(sector: &mut Sector, cfg: &TableConfig, width: LenWidth, key: &[u8]) -> Result<Option<Vec<u8>>> {
	let mut result = None;
	fetch(sector, cfg, width, key, false, |r| {
		if !r.data.is_empty() {
			result = Some(r.data.to_vec());
			true
		} else {
			false
		}
	})?;
	Ok(result)
}

/// Hex-dump handler building one CSV line per record:
/// `<key_hex>,<data_hex>,`. Mirrors `ldb_hexprint_width`'s column shape
/// for the `select ... csv hex <n>` CLI surface (spec.md section 6.3).
pub fn csv_hex_lines(sector: &mut Sector, cfg: &TableConfig, width: LenWidth, key: &[u8]) -> Result<Vec<String>> {
	let mut lines = Vec::new();
	fetch(sector, cfg, width, key, false, |r| {
		let mut full_key = Vec::with_capacity(4 + r.subkey.map_or(0, |s| s.len()));
		full_key.extend_from_slice(r.main_key);
		if let Some(sk) = r.subkey {
			full_key.extend_from_slice(sk);
		}
		lines.push(format!("{},{},", codec::hex(&full_key), codec::hex(r.data)));
		false
	})?;
	Ok(lines)
}

/// Builds one `dump <db>/<t> hex <n>` line for a record: the full key
/// hex-encoded, then up to `hex_bytes` total hex digits worth of leading
/// payload bytes (counted against the key's own length, as the original
/// does), then the remaining payload rendered as ASCII with non-printable
/// bytes shown as `.` (spec.md section 6.3; grounded on
/// `examples/original_source/src/string.c`'s `ldb_csvprint`).
fn dump_hex_line(full_key: &[u8], data: &[u8], hex_bytes: usize) -> String {
	let mut line = codec::hex(full_key);
	let remaining_hex = hex_bytes.saturating_sub(full_key.len());
	let remaining_hex = remaining_hex.min(data.len());
	if remaining_hex > 0 {
		line.push(',');
		line.push_str(&codec::hex(&data[..remaining_hex]));
	}
	line.push(',');
	for &b in &data[remaining_hex..] {
		line.push(if (32..=126).contains(&b) { b as char } else { '.' });
	}
	line
}

/// `dump <db>/<t> hex <n>`: one CSV line per record under `main_key`,
/// in insertion order (the caller sorts sectors/main keys; collate first
/// if ascending subkey order is required, per scenario 3).
pub fn dump_hex_lines(sector: &mut Sector, cfg: &TableConfig, width: LenWidth, main_key: &[u8; 4], hex_bytes: usize) -> Result<Vec<String>> {
	let mut lines = Vec::new();
	let mut probe_key = main_key.to_vec();
	probe_key.extend(std::iter::repeat(0u8).take(cfg.subkey_ln() as usize));
	fetch(sector, cfg, width, &probe_key, true, |r| {
		let mut full_key = Vec::with_capacity(4 + r.subkey.map_or(0, |s| s.len()));
		full_key.extend_from_slice(r.main_key);
		if let Some(sk) = r.subkey {
			full_key.extend_from_slice(sk);
		}
		lines.push(dump_hex_line(&full_key, r.data, hex_bytes));
		false
	})?;
	Ok(lines)
}

/// `dump keys from <db>/<t>`: every distinct full key (`main_key ++
/// subkey`) under `main_key`, hex-encoded, skipping consecutive repeats
/// (spec.md section 6.3; grounded on `examples/original_source/src/
/// keys.c`'s `ldb_dump_keys_handler`, which compares each assembled key
/// against the last one written rather than deduping globally).
pub fn dump_keys(sector: &mut Sector, cfg: &TableConfig, width: LenWidth, main_key: &[u8; 4]) -> Result<Vec<String>> {
	let mut keys = Vec::new();
	let mut last: Option<Vec<u8>> = None;
	let mut probe_key = main_key.to_vec();
	probe_key.extend(std::iter::repeat(0u8).take(cfg.subkey_ln() as usize));
	fetch(sector, cfg, width, &probe_key, true, |r| {
		let mut full_key = Vec::with_capacity(4 + r.subkey.map_or(0, |s| s.len()));
		full_key.extend_from_slice(r.main_key);
		if let Some(sk) = r.subkey {
			full_key.extend_from_slice(sk);
		}
		if last.as_deref() != Some(full_key.as_slice()) {
			keys.push(codec::hex(&full_key));
			last = Some(full_key);
		}
		false
	})?;
	Ok(keys)
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::node;

	fn setup(dir: &std::path::Path) -> Sector {
		crate::path::create_database(dir, "oss").unwrap();
		crate::path::create_table_dir(dir, "oss", "file").unwrap();
		Sector::open(dir, "oss", "file", 0x00, OpenMode::ReadWrite).unwrap().unwrap()
	}

	fn variable_group(subkey: &[u8], records: &[&[u8]]) -> Vec<u8> {
		let mut group = Vec::new();
		for r in records {
			let mut len = vec![0u8; 2];
			codec::write_u16(&mut len, r.len() as u16);
			group.extend_from_slice(&len);
			group.extend_from_slice(r);
		}
		let mut out = Vec::new();
		out.extend_from_slice(subkey);
		let mut size = vec![0u8; 2];
		codec::write_u16(&mut size, group.len() as u16);
		out.extend_from_slice(&size);
		out.extend_from_slice(&group);
		out
	}

	#[test]
	fn fetch_variable_mode_filters_by_subkey() {
		let dir = tempfile::tempdir().unwrap();
		let mut sector = setup(dir.path());
		let cfg = TableConfig::new(8, 0, 1).unwrap(); // subkey_ln = 4
		let main_key = [0x00, 0x11, 0x22, 0x33];

		let mut payload = Vec::new();
		payload.extend(variable_group(&[1, 0, 0, 0], &[b"alpha"]));
		payload.extend(variable_group(&[2, 0, 0, 0], &[b"beta", b"gamma"]));
		node::append(&mut sector, &cfg, LenWidth::U16, &main_key, &payload, None).unwrap();

		let mut key = main_key.to_vec();
		key.extend_from_slice(&[2, 0, 0, 0]);
		let mut seen = Vec::new();
		let n = fetch(&mut sector, &cfg, LenWidth::U16, &key, false, |r| {
			seen.push(r.data.to_vec());
			false
		})
		.unwrap();
		assert_eq!(n, 2);
		assert_eq!(seen, vec![b"beta".to_vec(), b"gamma".to_vec()]);
	}

	#[test]
	fn fetch_skip_subkey_returns_all_groups() {
		let dir = tempfile::tempdir().unwrap();
		let mut sector = setup(dir.path());
		let cfg = TableConfig::new(8, 0, 1).unwrap();
		let main_key = [0x00, 0x11, 0x22, 0x33];

		let mut payload = Vec::new();
		payload.extend(variable_group(&[1, 0, 0, 0], &[b"alpha"]));
		payload.extend(variable_group(&[2, 0, 0, 0], &[b"beta"]));
		node::append(&mut sector, &cfg, LenWidth::U16, &main_key, &payload, None).unwrap();

		let mut key = main_key.to_vec();
		key.extend_from_slice(&[9, 9, 9, 9]);
		let n = fetch(&mut sector, &cfg, LenWidth::U16, &key, true, |_| false).unwrap();
		assert_eq!(n, 2);
	}

	#[test]
	fn fixed_mode_yields_whole_node_per_call() {
		let dir = tempfile::tempdir().unwrap();
		let mut sector = setup(dir.path());
		let cfg = TableConfig::new(8, 4, 1).unwrap();
		let main_key = [0x00, 0x11, 0x22, 0x33];
		node::append(&mut sector, &cfg, LenWidth::U16, &main_key, b"abcdwxyz", Some(2)).unwrap();

		let mut key = main_key.to_vec();
		key.extend_from_slice(&[0, 0, 0, 0]);
		let mut calls = 0;
		let n = fetch(&mut sector, &cfg, LenWidth::U16, &key, false, |r| {
			calls += 1;
			assert_eq!(r.data, b"abcdwxyz");
			false
		})
		.unwrap();
		assert_eq!(n, 1);
		assert_eq!(calls, 1);
	}

	#[test]
	fn key_exists_and_first_record() {
		let dir = tempfile::tempdir().unwrap();
		let mut sector = setup(dir.path());
		let cfg = TableConfig::new(8, 0, 1).unwrap();
		let main_key = [0x00, 0x11, 0x22, 0x33];
		let payload = variable_group(&[1, 0, 0, 0], &[b"alpha"]);
		node::append(&mut sector, &cfg, LenWidth::U16, &main_key, &payload, None).unwrap();

		let mut key = main_key.to_vec();
		key.extend_from_slice(&[1, 0, 0, 0]);
		assert!(key_exists(&mut sector, &cfg, LenWidth::U16, &key).unwrap());
		assert_eq!(first_record(&mut sector, &cfg, LenWidth::U16, &key).unwrap(), Some(b"alpha".to_vec()));

		let mut missing = main_key.to_vec();
		missing.extend_from_slice(&[7, 7, 7, 7]);
		assert!(!key_exists(&mut sector, &cfg, LenWidth::U16, &missing).unwrap());
	}

	#[test]
	fn dump_hex_line_splits_key_bytes_from_ascii_tail() {
		let full_key = [0x00, 0x11, 0x22, 0x33, 1, 0, 0, 0];
		// hex_bytes covers the 8-byte key plus 1 more byte of payload.
		let line = dump_hex_line(&full_key, b"Xhello", 9);
		assert_eq!(line, "0011223301000000,58,hello");
	}

	#[test]
	fn dump_hex_line_renders_non_printable_as_dot() {
		let full_key = [0x00, 0x11, 0x22, 0x33];
		let line = dump_hex_line(&full_key, &[b'a', 0x00, b'b'], 4);
		assert_eq!(line, "00112233,a.b");
	}

	#[test]
	fn dump_hex_lines_covers_every_subkey_group() {
		let dir = tempfile::tempdir().unwrap();
		let mut sector = setup(dir.path());
		let cfg = TableConfig::new(8, 0, 1).unwrap();
		let main_key = [0x00, 0x11, 0x22, 0x33];
		let mut payload = Vec::new();
		payload.extend(variable_group(&[1, 0, 0, 0], &[b"alpha"]));
		payload.extend(variable_group(&[2, 0, 0, 0], &[b"beta"]));
		node::append(&mut sector, &cfg, LenWidth::U16, &main_key, &payload, None).unwrap();

		let lines = dump_hex_lines(&mut sector, &cfg, LenWidth::U16, &main_key, 8).unwrap();
		assert_eq!(lines, vec!["0011223301000000,alpha".to_string(), "0011223302000000,beta".to_string()]);
	}

	#[test]
	fn dump_keys_dedupes_consecutive_repeats() {
		let dir = tempfile::tempdir().unwrap();
		let mut sector = setup(dir.path());
		let cfg = TableConfig::new(8, 0, 1).unwrap();
		let main_key = [0x00, 0x11, 0x22, 0x33];
		let payload = variable_group(&[1, 0, 0, 0], &[b"alpha", b"alpha-again"]);
		node::append(&mut sector, &cfg, LenWidth::U16, &main_key, &payload, None).unwrap();

		let keys = dump_keys(&mut sector, &cfg, LenWidth::U16, &main_key).unwrap();
		assert_eq!(keys, vec![codec::hex(&[0x00, 0x11, 0x22, 0x33, 1, 0, 0, 0])]);
	}
}
