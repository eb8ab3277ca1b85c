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

//! Database/table directory layout and name validation (spec.md section 4.2).

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Matches LDB_MAX_NAME in the original implementation.
pub const MAX_NAME: usize = 64;

/// Rejects `/` and `.` (directory traversal, hidden files) and names that
/// are empty or exceed MAX_NAME, exactly as `ldb_valid_name` does.
pub fn valid_name(name: &str) -> bool {
	!name.is_empty() && name.len() < MAX_NAME && !name.contains('/') && !name.contains('.')
}

fn check_name(name: &str) -> Result<()> {
	if valid_name(name) {
		Ok(())
	} else {
		Err(Error::InvalidName("database/table names may not contain '/' or '.' and must be 1..64 bytes"))
	}
}

pub fn database_dir(root: &Path, db: &str) -> Result<PathBuf> {
	check_name(db)?;
	Ok(root.join(db))
}

pub fn table_dir(root: &Path, db: &str, table: &str) -> Result<PathBuf> {
	check_name(db)?;
	check_name(table)?;
	Ok(root.join(db).join(table))
}

pub fn table_cfg_path(root: &Path, db: &str, table: &str) -> Result<PathBuf> {
	check_name(db)?;
	check_name(table)?;
	Ok(root.join(db).join(format!("{}.cfg", table)))
}

pub fn sector_path(root: &Path, db: &str, table: &str, sector: u8) -> Result<PathBuf> {
	Ok(table_dir(root, db, table)?.join(format!("{:02x}.ldb", sector)))
}

pub fn sector_out_path(root: &Path, db: &str, table: &str, sector: u8) -> Result<PathBuf> {
	Ok(table_dir(root, db, table)?.join(format!("{:02x}.out", sector)))
}

pub fn mz_path(root: &Path, db: &str, table: &str, mz_id: u16, encrypted: bool) -> Result<PathBuf> {
	let suffix = if encrypted { ".mz.enc" } else { ".mz" };
	Ok(table_dir(root, db, table)?.join(format!("{:04x}{}", mz_id, suffix)))
}

pub fn version_path(root: &Path, db: &str) -> Result<PathBuf> {
	Ok(database_dir(root, db)?.join("version.json"))
}

/// `create database <name>`: makes `<root>/<db>/`.
pub fn create_database(root: &Path, db: &str) -> Result<()> {
	let path = database_dir(root, db)?;
	if path.exists() {
		return Err(Error::AlreadyExists(format!("database {}", db)));
	}
	std::fs::create_dir_all(&path)?;
	Ok(())
}

/// `create table <db>/<table>`: makes `<root>/<db>/<table>/`. The caller
/// writes the `.cfg` file separately via `config::TableConfig::write`.
pub fn create_table_dir(root: &Path, db: &str, table: &str) -> Result<()> {
	let db_path = database_dir(root, db)?;
	if !db_path.is_dir() {
		return Err(Error::NotFound(format!("database {}", db)));
	}
	let table_path = table_dir(root, db, table)?;
	if table_path.exists() {
		return Err(Error::AlreadyExists(format!("table {}/{}", db, table)));
	}
	std::fs::create_dir_all(&table_path)?;
	Ok(())
}

/// `show databases`: lists immediate subdirectories of the root.
pub fn show_databases(root: &Path) -> Result<Vec<String>> {
	list_dirs(root)
}

/// `show tables from <db>`: lists immediate subdirectories of a database.
pub fn show_tables(root: &Path, db: &str) -> Result<Vec<String>> {
	let path = database_dir(root, db)?;
	if !path.is_dir() {
		return Err(Error::NotFound(format!("database {}", db)));
	}
	list_dirs(&path)
}

fn list_dirs(path: &Path) -> Result<Vec<String>> {
	if !path.is_dir() {
		return Ok(Vec::new());
	}
	let mut names = Vec::new();
	for entry in std::fs::read_dir(path)? {
		let entry = entry?;
		if entry.file_type()?.is_dir() {
			if let Some(name) = entry.file_name().to_str() {
				names.push(name.to_string());
			}
		}
	}
	names.sort();
	Ok(names)
}
