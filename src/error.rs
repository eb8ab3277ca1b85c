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

//! Error taxonomy shared by every engine module. Each variant maps to one
//! of the `E###` codes the CLI surfaces to the user (section 6.3/7 of the
//! spec).

use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
	InvalidName(&'static str),
	NotFound(String),
	AlreadyExists(String),
	BadConfig(String),
	BadFormat(&'static str),
	SizeExceeded(&'static str),
	Io(std::io::Error),
	Locked(String),
	ResourceExhausted(&'static str),
	DecoderUnavailable,
}

impl Error {
	/// The `E###` diagnostic code printed by the CLI.
	///
	/// Each code below is the original's own, taken from
	/// `ldb_error.h`/`command.c`/`sector.c`/`lock.c`/`string.c` where that
	/// condition's message originates: `InvalidName` is the original's
	/// E064 ("Invalid characters or name is too long"), `NotFound` its
	/// E062 ("Database does not exist"; E063 covers the table-missing
	/// sibling case), `AlreadyExists` its E068 ("Database already
	/// exists"; E069 is the table-already-exists sibling), `BadConfig`
	/// its E076 (the original reuses E076 for every "config values don't
	/// satisfy a constraint" case: record length vs. key length, merge
	/// requiring matching key/record shape), `BadFormat` its E056 ("Data
	/// sector corrupted"), `SizeExceeded` its E053 ("Data record size
	/// exceeded"), `Io` its E065 ("Cannot create/access table"), and
	/// `Locked` its E051 ("Concurrent ldb writing not supported").
	///
	/// `ResourceExhausted` and `DecoderUnavailable` have no original
	/// counterpart — memory-budgeted collation and a pluggable decoder
	/// are both spec.md section 9 redesign additions — so they are
	/// numbered E200/E201, above every real code, rather than reusing a
	/// digit the original already assigned to something else. E080
	/// ("the csv file has an incorrect encoding") and E060 are
	/// deliberately left unused here: the original itself reassigns E060
	/// to two unrelated conditions in different files (`string.c`'s
	/// "table name format should be dbname/tablename" vs.
	/// `ldb_error.h`'s "unsupported node_length size"), so this crate
	/// does not pick either meaning and invite the same ambiguity.
	pub fn code(&self) -> &'static str {
		match self {
			Error::InvalidName(_) => "E064",
			Error::NotFound(_) => "E062",
			Error::AlreadyExists(_) => "E068",
			Error::BadConfig(_) => "E076",
			Error::BadFormat(_) => "E056",
			Error::SizeExceeded(_) => "E053",
			Error::Io(_) => "E065",
			Error::Locked(_) => "E051",
			Error::ResourceExhausted(_) => "E200",
			Error::DecoderUnavailable => "E201",
		}
	}
}

impl fmt::Display for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Error::InvalidName(msg) => write!(f, "{} invalid name: {}", self.code(), msg),
			Error::NotFound(what) => write!(f, "{} not found: {}", self.code(), what),
			Error::AlreadyExists(what) => write!(f, "{} already exists: {}", self.code(), what),
			Error::BadConfig(msg) => write!(f, "{} bad config: {}", self.code(), msg),
			Error::BadFormat(msg) => write!(f, "{} bad format: {}", self.code(), msg),
			Error::SizeExceeded(msg) => write!(f, "{} size exceeded: {}", self.code(), msg),
			Error::Io(e) => write!(f, "{} io failure: {}", self.code(), e),
			Error::Locked(what) => write!(f, "{} locked: {}", self.code(), what),
			Error::ResourceExhausted(msg) => write!(f, "{} resource exhausted: {}", self.code(), msg),
			Error::DecoderUnavailable => write!(f, "{} decoder unavailable", self.code()),
		}
	}
}

impl std::error::Error for Error {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			Error::Io(e) => Some(e),
			_ => None,
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(e: std::io::Error) -> Error {
		Error::Io(e)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn codes_match_spec_examples() {
		assert_eq!(Error::SizeExceeded("record").code(), "E053");
		assert_eq!(Error::BadFormat("corrupted").code(), "E056");
	}

	#[test]
	fn codes_match_original_taxonomy() {
		assert_eq!(Error::InvalidName("x").code(), "E064");
		assert_eq!(Error::NotFound("x".into()).code(), "E062");
		assert_eq!(Error::AlreadyExists("x".into()).code(), "E068");
		assert_eq!(Error::BadConfig("x".into()).code(), "E076");
		assert_eq!(Error::Locked("x".into()).code(), "E051");
	}
}
