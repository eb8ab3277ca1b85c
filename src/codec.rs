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

//! Fixed-width little-endian integer codec and hex helpers.
//!
//! All multibyte integers in the on-disk format (map slots, list heads,
//! node headers, record/group lengths) are little-endian. 40-bit values
//! are used for file offsets so a sector can grow past 4GiB without
//! widening every pointer to 64 bits.

use crate::error::{Error, Result};
use std::convert::TryInto;

/// Largest offset representable in a 40-bit pointer field.
pub const U40_MAX: u64 = (1u64 << 40) - 1;

pub fn read_u16(buf: &[u8]) -> Result<u16> {
	let b: [u8; 2] = buf.get(0..2).ok_or(Error::BadFormat("short read: u16"))?.try_into().unwrap();
	Ok(u16::from_le_bytes(b))
}

pub fn write_u16(buf: &mut [u8], val: u16) {
	buf[0..2].copy_from_slice(&val.to_le_bytes());
}

pub fn read_u32(buf: &[u8]) -> Result<u32> {
	let b: [u8; 4] = buf.get(0..4).ok_or(Error::BadFormat("short read: u32"))?.try_into().unwrap();
	Ok(u32::from_le_bytes(b))
}

pub fn write_u32(buf: &mut [u8], val: u32) {
	buf[0..4].copy_from_slice(&val.to_le_bytes());
}

/// Reads a 40-bit little-endian offset out of a 5-byte field.
pub fn read_u40(buf: &[u8]) -> Result<u64> {
	let b = buf.get(0..5).ok_or(Error::BadFormat("short read: u40"))?;
	let mut out = [0u8; 8];
	out[0..5].copy_from_slice(b);
	Ok(u64::from_le_bytes(out))
}

/// Writes a 40-bit little-endian offset into a 5-byte field.
///
/// Panics if `val` does not fit in 40 bits: a caller asking to encode a
/// larger offset has already violated the on-disk format's size ceiling
/// and there is no sane truncated value to write instead.
pub fn write_u40(buf: &mut [u8], val: u64) {
	assert!(val <= U40_MAX, "offset {} does not fit in 40 bits", val);
	let bytes = val.to_le_bytes();
	buf[0..5].copy_from_slice(&bytes[0..5]);
}

pub fn hex(data: &[u8]) -> String {
	let mut s = String::with_capacity(data.len() * 2);
	for b in data {
		s.push_str(&format!("{:02x}", b));
	}
	s
}

pub fn unhex(s: &str) -> Result<Vec<u8>> {
	hex::decode(s).map_err(|_| Error::InvalidName("invalid hex string"))
}
