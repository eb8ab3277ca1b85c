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

//! Collate engine (spec.md section 4.8): rewrites a sector into a
//! deduplicated, sorted form, optionally merging into another table or
//! filtering by a delete-tuple set.

use crate::codec;
use crate::config::TableConfig;
use crate::decoder::Decoder;
use crate::error::{Error, Result};
use crate::node::{self, LenWidth, MAX_NODE_PAYLOAD};
use crate::recordset;
use crate::sector::{self, OpenMode, Sector};
use std::path::Path;

/// `LDB_MAX_RECORDS`: hard ceiling on records processed in one collate
/// pass across the whole table; further records are dropped with a
/// diagnostic (spec.md section 9 "Open questions").
pub const MAX_RECORDS_PER_PASS: usize = 500_000;

#[derive(Clone, Copy, Debug, Default)]
pub struct CollateStats {
	pub read: usize,
	pub kept: usize,
	pub deduped: usize,
	pub deleted: usize,
	pub dropped_cap: usize,
	pub sectors_skipped: usize,
}

impl CollateStats {
	fn merge(&mut self, other: CollateStats) {
		self.read += other.read;
		self.kept += other.kept;
		self.deduped += other.deduped;
		self.deleted += other.deleted;
		self.dropped_cap += other.dropped_cap;
		self.sectors_skipped += other.sectors_skipped;
	}
}

pub struct CollateOptions {
	pub max_records_per_pass: usize,
	/// If set, a sector whose on-disk size exceeds this many bytes is
	/// skipped rather than loaded, per spec.md's "refuses to collate a
	/// sector if the estimated buffer size exceeds a configured fraction
	/// of free RAM" resource-discipline rule.
	pub max_sector_bytes: Option<u64>,
	pub compare_width: Option<usize>,
}

impl Default for CollateOptions {
	fn default() -> Self {
		CollateOptions { max_records_per_pass: MAX_RECORDS_PER_PASS, max_sector_bytes: None, compare_width: None }
	}
}

enum Destination<'a> {
	Build,
	Merge { dest_db: &'a str, dest_table: &'a str },
}

/// One delete-tuple: `(key, optional text-field template)`. `text` with
/// `*` wildcards is compared field-by-field against a comma-separated
/// textual rendering of the record's secondary keys + payload (spec.md
/// section 4.8).
#[derive(Clone, Debug)]
pub struct DeleteTuple {
	pub key: Vec<u8>,
	pub text: Option<String>,
}

/// Sorted delete-tuple set with a `key[0]`-range fast path, matching the
/// shape (if not the exact bit-for-bit layout) of the original's
/// sorted-array-plus-index-table design.
pub struct DeleteSet {
	tuples: Vec<DeleteTuple>,
}

impl DeleteSet {
	pub fn new(mut tuples: Vec<DeleteTuple>) -> DeleteSet {
		tuples.sort_by(|a, b| a.key.cmp(&b.key));
		DeleteSet { tuples }
	}

	fn range_for_sector(&self, sector_byte: u8) -> &[DeleteTuple] {
		let start = self.tuples.partition_point(|t| t.key.first().copied().unwrap_or(0) < sector_byte);
		let end = self.tuples.partition_point(|t| t.key.first().copied().unwrap_or(0) <= sector_byte);
		&self.tuples[start..end]
	}

	/// Whether `(key, secondary_keys, data)` matches any tuple in this set.
	fn matches(&self, sector_byte: u8, key: &[u8], secondary_keys: &[&[u8]], data: &[u8], decoder: Option<&dyn Decoder>) -> bool {
		for tuple in self.range_for_sector(sector_byte) {
			if tuple.key != key {
				continue;
			}
			match &tuple.text {
				None => return true,
				Some(template) => {
					let decoded;
					let effective_data: &[u8] = match decoder {
						Some(d) => {
							decoded = d.decode(data).unwrap_or_else(|_| data.to_vec());
							&decoded
						}
						None => data,
					};
					if text_matches(template, secondary_keys, effective_data) {
						return true;
					}
				}
			}
		}
		false
	}
}

/// Splits `template` on commas and compares field-by-field against the
/// secondary keys followed by the payload, treating `*` as "any value".
fn text_matches(template: &str, secondary_keys: &[&[u8]], data: &[u8]) -> bool {
	let fields: Vec<&str> = template.split(',').collect();
	let mut actual: Vec<String> = secondary_keys.iter().map(|k| codec::hex(k)).collect();
	actual.push(String::from_utf8_lossy(data).to_string());
	if fields.len() != actual.len() {
		return false;
	}
	fields.iter().zip(actual.iter()).all(|(f, a)| *f == "*" || f.trim() == a.as_str())
}

/// Splits a record's data into its embedded secondary keys and the
/// remaining payload, for tables with `keys > 1` (spec.md section 3: "the
/// first `(keys-1) x key_ln` bytes of a record are interpreted as extra
/// binary keys that collation and deletion can compare against").
fn split_secondary_keys<'a>(cfg: &TableConfig, data: &'a [u8]) -> (Vec<&'a [u8]>, &'a [u8]) {
	if cfg.keys <= 1 {
		return (Vec::new(), data);
	}
	let extra = cfg.keys as usize - 1;
	let prefix_len = extra * cfg.key_ln as usize;
	if prefix_len >= data.len() {
		return (Vec::new(), data);
	}
	let keys = (0..extra).map(|i| &data[i * cfg.key_ln as usize..(i + 1) * cfg.key_ln as usize]).collect();
	(keys, &data[prefix_len..])
}

struct RowBuffer {
	subkey_ln: usize,
	rows: Vec<Vec<u8>>,
}

impl RowBuffer {
	fn new(cfg: &TableConfig) -> RowBuffer {
		RowBuffer { subkey_ln: cfg.subkey_ln() as usize, rows: Vec::new() }
	}

	fn push(&mut self, subkey: &[u8], data: &[u8]) {
		let mut row = Vec::with_capacity(self.subkey_ln + data.len());
		row.extend_from_slice(subkey);
		row.extend_from_slice(data);
		self.rows.push(row);
	}

	/// Sorts rows bytewise over the first `compare_width` bytes (subkey
	/// then data) and drops byte-identical rows, matching the original's
	/// "sort the buffer, then reject a record that equals its
	/// predecessor" pass.
	fn sort_and_dedup(&mut self, compare_width: Option<usize>) -> usize {
		self.rows.sort_by(|a, b| {
			let w = compare_width.unwrap_or_else(|| a.len().max(b.len()));
			let a_cmp = &a[..a.len().min(w)];
			let b_cmp = &b[..b.len().min(w)];
			a_cmp.cmp(b_cmp).then_with(|| a.cmp(b))
		});
		let before = self.rows.len();
		self.rows.dedup();
		before - self.rows.len()
	}

	fn clear(&mut self) {
		self.rows.clear();
	}
}

fn flush_fixed(dest: &mut Sector, cfg: &TableConfig, width: LenWidth, main_key: &[u8; 4], rows: &[Vec<u8>]) -> Result<()> {
	let row_len = match rows.first() {
		Some(r) => r.len(),
		None => return Ok(()),
	};
	let rows_per_node = (MAX_NODE_PAYLOAD / row_len).max(1);
	for chunk in rows.chunks(rows_per_node) {
		let mut payload = Vec::with_capacity(chunk.len() * row_len);
		for row in chunk {
			payload.extend_from_slice(row);
		}
		node::append(dest, cfg, width, main_key, &payload, Some(chunk.len() as u16))?;
	}
	Ok(())
}

fn group_len(subkey_ln: usize, records: &[&[u8]]) -> usize {
	subkey_ln + 2 + records.iter().map(|r| 2 + r.len()).sum::<usize>()
}

fn emit_group(payload: &mut Vec<u8>, subkey: &[u8], records: &[&[u8]]) {
	payload.extend_from_slice(subkey);
	let body_len: usize = records.iter().map(|r| 2 + r.len()).sum();
	let mut len_buf = [0u8; 2];
	codec::write_u16(&mut len_buf, body_len as u16);
	payload.extend_from_slice(&len_buf);
	for r in records {
		let mut rlen = [0u8; 2];
		codec::write_u16(&mut rlen, r.len() as u16);
		payload.extend_from_slice(&rlen);
		payload.extend_from_slice(r);
	}
}

/// Streams sorted `(subkey, data)` rows into nodes, merging consecutive
/// identical subkeys into one group and starting a new node once the
/// projected payload would exceed the node cap.
fn flush_variable(dest: &mut Sector, cfg: &TableConfig, width: LenWidth, main_key: &[u8; 4], rows: &[Vec<u8>], subkey_ln: usize) -> Result<()> {
	let mut payload = Vec::new();
	let mut group_subkey: Option<&[u8]> = None;
	let mut group_records: Vec<&[u8]> = Vec::new();

	for row in rows {
		let (subkey, data) = row.split_at(subkey_ln);
		if group_subkey == Some(subkey) {
			if group_records.last().map_or(false, |prev| *prev == data) {
				continue; // verbatim duplicate within the same group
			}
			group_records.push(data);
			continue;
		}

		if let Some(gs) = group_subkey {
			if payload.len() + group_len(subkey_ln, &group_records) > MAX_NODE_PAYLOAD && !payload.is_empty() {
				node::append(dest, cfg, width, main_key, &payload, None)?;
				payload.clear();
			}
			emit_group(&mut payload, gs, &group_records);
		}
		group_subkey = Some(subkey);
		group_records = vec![data];
	}
	if let Some(gs) = group_subkey {
		if payload.len() + group_len(subkey_ln, &group_records) > MAX_NODE_PAYLOAD && !payload.is_empty() {
			node::append(dest, cfg, width, main_key, &payload, None)?;
			payload.clear();
		}
		emit_group(&mut payload, gs, &group_records);
	}
	if !payload.is_empty() {
		node::append(dest, cfg, width, main_key, &payload, None)?;
	}
	Ok(())
}


/// Collects `(subkey, data)` pairs for one main key's list, filtering out
/// anything matched by `delete`. Fixed-record nodes pack raw
/// `subkey ++ data` entries back to back; variable-record nodes use the
/// grouped format `recordset::fetch` already understands.
fn collect_records(
	src: &mut Sector,
	cfg: &TableConfig,
	width: LenWidth,
	main_key: [u8; 4],
	sector_byte: u8,
	delete: Option<&DeleteSet>,
	decoder: Option<&dyn Decoder>,
	opts: &CollateOptions,
	budget: &mut usize,
	stats: &mut CollateStats,
) -> Result<RowBuffer> {
	let mut buffer = RowBuffer::new(cfg);

	let is_deleted = |stats: &mut CollateStats, subkey: &[u8], data: &[u8]| -> bool {
		let (secondary, payload) = split_secondary_keys(cfg, data);
		let matched = delete.map_or(false, |d| {
			let mut full = main_key.to_vec();
			full.extend_from_slice(subkey);
			d.matches(sector_byte, &full, &secondary, payload, decoder)
		});
		if matched {
			stats.deleted += 1;
		}
		matched
	};

	if cfg.rec_ln > 0 {
		let subkey_ln = cfg.subkey_ln() as usize;
		let entry_len = subkey_ln + cfg.rec_ln as usize;
		let mut next = match node::list_head(src, &main_key)? {
			Some((first, _)) => first,
			None => 0,
		};
		while next != 0 {
			let (header, payload) = node::read_node(src, cfg, width, next)?;
			let mut pos = 0usize;
			while pos + entry_len <= payload.len() {
				stats.read += 1;
				if stats.read > opts.max_records_per_pass || *budget >= opts.max_records_per_pass {
					stats.dropped_cap += 1;
				} else {
					*budget += 1;
					let subkey = &payload[pos..pos + subkey_ln];
					let data = &payload[pos + subkey_ln..pos + entry_len];
					if !is_deleted(stats, subkey, data) {
						buffer.push(subkey, data);
					}
				}
				pos += entry_len;
			}
			next = header.next;
		}
	} else {
		let mut probe_key = main_key.to_vec();
		probe_key.extend(std::iter::repeat(0u8).take(cfg.subkey_ln() as usize));
		recordset::fetch(src, cfg, width, &probe_key, true, |r| {
			stats.read += 1;
			if stats.read > opts.max_records_per_pass || *budget >= opts.max_records_per_pass {
				stats.dropped_cap += 1;
				return false;
			}
			*budget += 1;
			let subkey = r.subkey.unwrap_or(&[]);
			if !is_deleted(stats, subkey, r.data) {
				buffer.push(subkey, r.data);
			}
			false
		})?;
	}
	Ok(buffer)
}

fn collate_one_sector(
	root: &Path,
	db: &str,
	table: &str,
	cfg: &TableConfig,
	width: LenWidth,
	sector_byte: u8,
	dest: Destination,
	delete: Option<&DeleteSet>,
	decoder: Option<&dyn Decoder>,
	opts: &CollateOptions,
	budget: &mut usize,
) -> Result<CollateStats> {
	let mut stats = CollateStats::default();

	if !sector::exists(root, db, table, sector_byte)? {
		return Ok(stats);
	}

	if let Some(max) = opts.max_sector_bytes {
		let size = crate::path::sector_path(root, db, table, sector_byte)?.metadata()?.len();
		if size > max {
			log::warn!(target: "ldb", "skipping sector {:02x}: {} bytes exceeds collate RAM budget {}", sector_byte, size, max);
			return Err(Error::ResourceExhausted("sector exceeds configured RAM budget"));
		}
	}

	let mut src = Sector::open(root, db, table, sector_byte, OpenMode::Read)?.unwrap();
	let main_keys = sector::main_keys(&mut src, sector_byte)?;

	let mut out_sector: Option<Sector> = None;
	let mut merge_sector: Option<Sector> = None;
	let dest_sector: &mut Sector = match &dest {
		Destination::Build => {
			out_sector = Some(Sector::open_for_collate_output(root, db, table, sector_byte)?);
			out_sector.as_mut().unwrap()
		}
		Destination::Merge { dest_db, dest_table } => {
			merge_sector = Some(Sector::open(root, dest_db, dest_table, sector_byte, OpenMode::ReadWrite)?.unwrap());
			merge_sector.as_mut().unwrap()
		}
	};

	for main_key in main_keys {
		let mut buffer = collect_records(&mut src, cfg, width, main_key, sector_byte, delete, decoder, opts, budget, &mut stats)?;
		let deduped = buffer.sort_and_dedup(opts.compare_width);
		stats.deduped += deduped;
		stats.kept += buffer.rows.len();

		if cfg.rec_ln > 0 {
			flush_fixed(dest_sector, cfg, width, &main_key, &buffer.rows)?;
		} else {
			flush_variable(dest_sector, cfg, width, &main_key, &buffer.rows, cfg.subkey_ln() as usize)?;
		}
		buffer.clear();
	}

	dest_sector.flush()?;
	drop(src);

	match dest {
		Destination::Build => {
			drop(out_sector);
			sector::commit_build(root, db, table, sector_byte)?;
		}
		Destination::Merge { .. } => {
			sector::commit_merge(root, db, table, sector_byte)?;
		}
	}

	Ok(stats)
}

enum DestinationKind<'a> {
	Build,
	Merge { dest_db: &'a str, dest_table: &'a str },
}

fn run_over_sectors(
	root: &Path,
	db: &str,
	table: &str,
	cfg: &TableConfig,
	width: LenWidth,
	dest_kind: DestinationKind,
	delete: Option<&DeleteSet>,
	decoder: Option<&dyn Decoder>,
	opts: &CollateOptions,
) -> Result<CollateStats> {
	let mut total = CollateStats::default();
	let mut budget = 0usize;
	for sector_byte in 0u16..256 {
		let sector_byte = sector_byte as u8;
		let dest = match &dest_kind {
			DestinationKind::Build => Destination::Build,
			DestinationKind::Merge { dest_db, dest_table } => Destination::Merge { dest_db, dest_table },
		};
		match collate_one_sector(root, db, table, cfg, width, sector_byte, dest, delete, decoder, opts, &mut budget) {
			Ok(stats) => total.merge(stats),
			Err(Error::ResourceExhausted(_)) => total.sectors_skipped += 1,
			Err(e) => return Err(e),
		}
	}
	Ok(total)
}

/// `collate <db>/<t> max <n>`: dedupe and sort every sector of a table,
/// replacing each sector in place via its `.out` staging file.
pub fn collate_table(root: &Path, db: &str, table: &str, cfg: &TableConfig, width: LenWidth, opts: &CollateOptions) -> Result<CollateStats> {
	run_over_sectors(root, db, table, cfg, width, DestinationKind::Build, None, None, opts)
}

/// `merge <db>/<t1> into <db>/<t2> max <n>`: requires both tables share
/// `key_ln`/`rec_ln` (spec.md section 4.8); the caller validates this via
/// `Store::merge`.
pub fn merge_table(
	root: &Path,
	src_db: &str,
	src_table: &str,
	dest_db: &str,
	dest_table: &str,
	cfg: &TableConfig,
	width: LenWidth,
	opts: &CollateOptions,
) -> Result<CollateStats> {
	run_over_sectors(root, src_db, src_table, cfg, width, DestinationKind::Merge { dest_db, dest_table }, None, None, opts)
}

/// `delete from <db>/<t> ...`: same traversal as collate, but records
/// matching `delete` are dropped instead of kept.
pub fn delete_table(
	root: &Path,
	db: &str,
	table: &str,
	cfg: &TableConfig,
	width: LenWidth,
	delete: &DeleteSet,
	decoder: Option<&dyn Decoder>,
	opts: &CollateOptions,
) -> Result<CollateStats> {
	run_over_sectors(root, db, table, cfg, width, DestinationKind::Build, Some(delete), decoder, opts)
}
