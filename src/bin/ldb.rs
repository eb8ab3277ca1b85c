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

use ldb::cli::{self, Options};
use ldb::store::Store;
use structopt::StructOpt;

fn main() {
	env_logger::init();
	let options = Options::from_args();
	let store = Store::open(&options.root).with_len_width(cli::len_width_from_env());

	match cli::run(&store, options.command) {
		Ok(lines) => {
			for line in lines {
				println!("{}", line);
			}
		}
		Err(e) => {
			eprintln!("{}", e);
			std::process::exit(1);
		}
	}
}
