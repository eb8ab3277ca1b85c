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

//! Node append/link/traversal/validation (spec.md section 4.6).
//!
//! A node is `u40 next || u16-or-u32 length || [u16 record_count] || payload`.
//! The list-head record living at the map slot's target offset is a bare
//! `u40 first || u40 last` pair with no header of its own.

use crate::codec;
use crate::config::TableConfig;
use crate::error::{Error, Result};
use crate::sector::{Sector, MAP_SIZE};

/// 16-bit length fields cap a node's payload at 65535 bytes
/// (`LDB_MAX_NODE_LN`-adjacent cap named explicitly in spec.md).
pub const MAX_NODE_PAYLOAD: usize = 65_535;

/// `LDB_MAX_NODE_DATA_LN`: the original's pre-node-cap guard on a single
/// record's size, independent of `rec_ln`/`max_rec_ln` plumbing.
pub const MAX_RECORD_DATA_LEN: usize = 4 * 1024 * 1024;

const PTR_LEN: usize = 5;
const HEAD_LEN: usize = PTR_LEN * 2;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LenWidth {
	U16,
	U32,
}

impl LenWidth {
	pub fn bytes(self) -> usize {
		match self {
			LenWidth::U16 => 2,
			LenWidth::U32 => 4,
		}
	}

	pub fn read(self, buf: &[u8]) -> Result<u32> {
		match self {
			LenWidth::U16 => codec::read_u16(buf).map(|v| v as u32),
			LenWidth::U32 => codec::read_u32(buf),
		}
	}

	pub fn write(self, buf: &mut [u8], val: u32) {
		match self {
			LenWidth::U16 => codec::write_u16(buf, val as u16),
			LenWidth::U32 => codec::write_u32(buf, val),
		}
	}
}

#[derive(Clone, Debug)]
pub struct NodeHeader {
	pub next: u64,
	pub length: u32,
	/// Present exactly when `rec_ln > 0` (spec.md section 6.2).
	pub record_count: Option<u16>,
	/// Offset of the first payload byte within the sector.
	pub payload_offset: u64,
	/// Offset one past the end of this node (where the next node, if
	/// appended immediately after, would start).
	pub end_offset: u64,
}

fn header_len(cfg: &TableConfig, width: LenWidth) -> usize {
	PTR_LEN + width.bytes() + if cfg.rec_ln > 0 { 2 } else { 0 }
}

/// Reads a node's header (not its payload) at `offset`.
pub fn read_header(sector: &mut Sector, cfg: &TableConfig, width: LenWidth, offset: u64) -> Result<NodeHeader> {
	let hlen = header_len(cfg, width);
	let mut buf = vec![0u8; hlen];
	sector.read_at(offset, &mut buf)?;
	let next = codec::read_u40(&buf[0..PTR_LEN])?;
	let length = width.read(&buf[PTR_LEN..PTR_LEN + width.bytes()])?;
	let mut pos = PTR_LEN + width.bytes();
	let record_count = if cfg.rec_ln > 0 {
		let rc = codec::read_u16(&buf[pos..pos + 2])?;
		pos += 2;
		Some(rc)
	} else {
		None
	};
	let payload_offset = offset + pos as u64;
	Ok(NodeHeader { next, length, record_count, payload_offset, end_offset: payload_offset + length as u64 })
}

/// Reads a node's header and payload together.
pub fn read_node(sector: &mut Sector, cfg: &TableConfig, width: LenWidth, offset: u64) -> Result<(NodeHeader, Vec<u8>)> {
	let header = read_header(sector, cfg, width, offset)?;
	let mut payload = vec![0u8; header.length as usize];
	sector.read_at(header.payload_offset, &mut payload)?;
	Ok((header, payload))
}

fn read_head(sector: &mut Sector, offset: u64) -> Result<(u64, u64)> {
	let mut buf = [0u8; HEAD_LEN];
	sector.read_at(offset, &mut buf)?;
	Ok((codec::read_u40(&buf[0..5])?, codec::read_u40(&buf[5..10])?))
}

fn write_head(sector: &mut Sector, offset: u64, first: u64, last: u64) -> Result<()> {
	let mut buf = [0u8; HEAD_LEN];
	codec::write_u40(&mut buf[0..5], first);
	codec::write_u40(&mut buf[5..10], last);
	sector.write_at(offset, &buf)
}

fn write_next(sector: &mut Sector, node_offset: u64, next: u64) -> Result<()> {
	let mut buf = [0u8; PTR_LEN];
	codec::write_u40(&mut buf, next);
	sector.write_at(node_offset, &buf)
}

fn read_next(sector: &mut Sector, node_offset: u64) -> Result<u64> {
	let mut buf = [0u8; PTR_LEN];
	sector.read_at(node_offset, &mut buf)?;
	codec::read_u40(&buf)
}

/// Walks from `first` following `next` pointers until a node with
/// `next == 0` is found, returning its offset. Mirrors
/// `last_node_recovery` in the original: called only when the stored
/// `last` pointer turns out to be below the map size (spec.md's "Open
/// Questions" item 2 - the self-healing branch is the specified one).
fn repair_list_tail(sector: &mut Sector, first: u64) -> Result<u64> {
	let mut ptr = first;
	let mut found = 0;
	loop {
		let next = read_next(sector, ptr)?;
		if next == 0 {
			found = ptr;
			break;
		}
		ptr = next;
	}
	Ok(found)
}

/// Appends one node holding `payload` for `main_key`, linking it to the
/// tail of that key's list. Returns the new node's offset.
pub fn append(
	sector: &mut Sector,
	cfg: &TableConfig,
	width: LenWidth,
	main_key: &[u8; 4],
	payload: &[u8],
	record_count: Option<u16>,
) -> Result<u64> {
	if payload.len() > MAX_NODE_PAYLOAD {
		return Err(Error::SizeExceeded("node payload exceeds 65535 bytes"));
	}
	if width == LenWidth::U16 && payload.len() > u16::MAX as usize {
		return Err(Error::SizeExceeded("node payload exceeds 16-bit length field"));
	}

	let hlen = header_len(cfg, width);
	let mut buf = vec![0u8; hlen + payload.len()];
	// next = 0 until linked below.
	width.write(&mut buf[PTR_LEN..PTR_LEN + width.bytes()], payload.len() as u32);
	let mut pos = PTR_LEN + width.bytes();
	if cfg.rec_ln > 0 {
		codec::write_u16(&mut buf[pos..pos + 2], record_count.unwrap_or(0));
		pos += 2;
	}
	buf[pos..].copy_from_slice(payload);

	let node_offset = sector.append(&buf)?;
	if node_offset < MAP_SIZE {
		return Err(Error::BadFormat("node offset below map size"));
	}

	link(sector, main_key, node_offset)?;
	Ok(node_offset)
}

/// Step 4 of spec.md section 4.6: look up the list head for `main_key`
/// and extend it with `new_node`.
fn link(sector: &mut Sector, main_key: &[u8; 4], new_node: u64) -> Result<()> {
	let head_offset = sector.read_map_slot(main_key)?;
	if head_offset == 0 {
		let head_offset = sector.append(&[0u8; HEAD_LEN])?;
		write_head(sector, head_offset, new_node, new_node)?;
		sector.write_map_slot(main_key, head_offset)?;
		return Ok(());
	}

	let (first, last) = read_head(sector, head_offset)?;
	let last = if last < MAP_SIZE {
		log::warn!(target: "ldb", "self-healing broken list at head {}: stored last pointer {} is below map size", head_offset, last);
		let healed = repair_list_tail(sector, first)?;
		if healed == 0 {
			// The list is in fact empty; treat new_node as the only entry.
			write_head(sector, head_offset, new_node, new_node)?;
			return Ok(());
		}
		healed
	} else {
		last
	};

	write_next(sector, last, new_node)?;
	write_head(sector, head_offset, first, new_node)?;
	Ok(())
}

/// Reads the list head for `main_key`, returning `None` if there is no
/// list yet.
pub fn list_head(sector: &mut Sector, main_key: &[u8; 4]) -> Result<Option<(u64, u64)>> {
	let head_offset = sector.read_map_slot(main_key)?;
	if head_offset == 0 {
		return Ok(None);
	}
	Ok(Some(read_head(sector, head_offset)?))
}

/// `unlink list from <db>/<t> key <hex>`: clears the map slot without
/// touching the nodes themselves (lazy delete, spec.md section 8
/// scenario 5 — sector file size is unchanged).
pub fn unlink(sector: &mut Sector, main_key: &[u8; 4]) -> Result<()> {
	sector.write_map_slot(main_key, 0)
}

/// Validates a variable-record node's subkey-group structure: walks
/// groups and confirms the cumulative offsets land exactly on the
/// payload boundary (spec.md section 3 invariant + section 4.6).
pub fn validate_variable_payload(payload: &[u8], subkey_ln: usize) -> bool {
	let mut pos = 0usize;
	let len = payload.len();
	while pos < len {
		if pos + subkey_ln + 2 > len {
			return false;
		}
		pos += subkey_ln;
		let group_size = match codec::read_u16(&payload[pos..pos + 2]) {
			Ok(v) => v as usize,
			Err(_) => return false,
		};
		pos += 2;
		if pos + group_size > len {
			return false;
		}
		let group_end = pos + group_size;
		while pos < group_end {
			if pos + 2 > group_end {
				return false;
			}
			let rec_size = match codec::read_u16(&payload[pos..pos + 2]) {
				Ok(v) => v as usize,
				Err(_) => return false,
			};
			pos += 2;
			if pos + rec_size > group_end {
				return false;
			}
			pos += rec_size;
		}
		if pos != group_end {
			return false;
		}
	}
	pos == len
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::sector::OpenMode;

	fn open(dir: &std::path::Path) -> Sector {
		crate::path::create_database(dir, "oss").unwrap();
		crate::path::create_table_dir(dir, "oss", "file").unwrap();
		Sector::open(dir, "oss", "file", 0x11, OpenMode::ReadWrite).unwrap().unwrap()
	}

	#[test]
	fn append_single_node_and_traverse() {
		let dir = tempfile::tempdir().unwrap();
		let mut sector = open(dir.path());
		let cfg = TableConfig::new(16, 0, 1).unwrap();
		let key = [0x11, 0x22, 0x33, 0x44];

		let n1 = append(&mut sector, &cfg, LenWidth::U16, &key, b"payload-1", None).unwrap();
		let (first, last) = list_head(&mut sector, &key).unwrap().unwrap();
		assert_eq!(first, n1);
		assert_eq!(last, n1);

		let n2 = append(&mut sector, &cfg, LenWidth::U16, &key, b"payload-2", None).unwrap();
		let (first, last) = list_head(&mut sector, &key).unwrap().unwrap();
		assert_eq!(first, n1);
		assert_eq!(last, n2);

		let (h1, p1) = read_node(&mut sector, &cfg, LenWidth::U16, n1).unwrap();
		assert_eq!(h1.next, n2);
		assert_eq!(p1, b"payload-1");
		let (h2, p2) = read_node(&mut sector, &cfg, LenWidth::U16, n2).unwrap();
		assert_eq!(h2.next, 0);
		assert_eq!(p2, b"payload-2");
	}

	#[test]
	fn unlink_clears_map_slot_without_touching_nodes() {
		let dir = tempfile::tempdir().unwrap();
		let mut sector = open(dir.path());
		let cfg = TableConfig::new(16, 0, 1).unwrap();
		let key = [0x11, 0x22, 0x33, 0x44];
		append(&mut sector, &cfg, LenWidth::U16, &key, b"x", None).unwrap();
		let size_before = sector.len().unwrap();
		unlink(&mut sector, &key).unwrap();
		assert!(list_head(&mut sector, &key).unwrap().is_none());
		assert_eq!(sector.len().unwrap(), size_before);
	}

	#[test]
	fn self_heals_broken_last_pointer() {
		let dir = tempfile::tempdir().unwrap();
		let mut sector = open(dir.path());
		let cfg = TableConfig::new(16, 0, 1).unwrap();
		let key = [0x11, 0x22, 0x33, 0x44];
		let n1 = append(&mut sector, &cfg, LenWidth::U16, &key, b"first", None).unwrap();

		// Simulate a crash between the node append and the head update:
		// corrupt the stored `last` pointer to something below MAP_SIZE.
		let head_offset = sector.read_map_slot(&key).unwrap();
		write_head(&mut sector, head_offset, n1, 0).unwrap();

		let n2 = append(&mut sector, &cfg, LenWidth::U16, &key, b"second", None).unwrap();
		let (first, last) = list_head(&mut sector, &key).unwrap().unwrap();
		assert_eq!(first, n1);
		assert_eq!(last, n2);
		let (h1, _) = read_node(&mut sector, &cfg, LenWidth::U16, n1).unwrap();
		assert_eq!(h1.next, n2);
	}

	#[test]
	fn validates_well_formed_variable_payload() {
		// One group: subkey_ln=2, group with one record of 3 bytes.
		let mut payload = Vec::new();
		payload.extend_from_slice(&[0xaa, 0xbb]); // subkey
		let mut group = Vec::new();
		codec::write_u16(&mut [0u8; 2], 0); // no-op, just exercising API shape
		let mut rec = vec![0u8; 2];
		codec::write_u16(&mut rec, 3);
		group.extend_from_slice(&rec);
		group.extend_from_slice(b"abc");
		let mut group_size = vec![0u8; 2];
		codec::write_u16(&mut group_size, group.len() as u16);
		payload.extend_from_slice(&group_size);
		payload.extend_from_slice(&group);

		assert!(validate_variable_payload(&payload, 2));
		payload.pop();
		assert!(!validate_variable_payload(&payload, 2));
	}
}
