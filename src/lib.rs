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

//! An append-only, mapped linked-list key/value store for large sets of
//! short records: every key maps to a singly-linked list of nodes inside
//! one of 256 per-table sector files, addressed through a fixed-size map
//! of 40-bit file offsets.

pub mod codec;
pub mod collate;
pub mod config;
pub mod decoder;
pub mod error;
pub mod lock;
pub mod mz;
pub mod node;
pub mod path;
pub mod recordset;
pub mod sector;
pub mod store;
pub mod write;

#[cfg(feature = "admin")]
pub mod cli;

pub use error::{Error, Result};
pub use node::LenWidth;
pub use store::Store;
