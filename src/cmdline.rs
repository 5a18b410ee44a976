/*
 * Copyright 2024 Luc Lenôtre
 *
 * This file is part of Lumen.
 *
 * Lumen is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Lumen is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Lumen. If not, see <https://www.gnu.org/licenses/>.
 */

//! Boot-time kernel command line arguments parsing.

use core::fmt;

/// A command line parsing error.
#[derive(Debug)]
pub struct ParseError {
	/// An error message.
	err: &'static str,
}

impl fmt::Display for ParseError {
	fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
		write!(fmt, "Error while parsing command line arguments: {}", self.err)
	}
}

/// Command line argument parser.
///
/// Every byte in the command line is interpreted as an ASCII character.
pub struct ArgsParser<'s> {
	/// The path to the init binary, if specified.
	init: Option<&'s [u8]>,
	/// Whether the kernel boots silently.
	silent: bool,
}

impl<'s> ArgsParser<'s> {
	/// Parses the given command line and returns a new instance.
	pub fn parse(cmdline: &'s [u8]) -> Result<Self, ParseError> {
		let mut s = Self {
			init: None,
			silent: false,
		};
		let mut iter = cmdline
			.split(|b| (*b as char).is_ascii_whitespace())
			.filter(|tok| !tok.is_empty());
		while let Some(token) = iter.next() {
			match token {
				b"-init" => {
					let Some(init) = iter.next() else {
						return Err(ParseError {
							err: "not enough arguments for `-init`",
						});
					};
					s.init = Some(init);
				}
				b"-silent" => s.silent = true,
				_ => {
					return Err(ParseError {
						err: "invalid argument",
					});
				}
			}
		}
		Ok(s)
	}

	/// Returns the init binary path if specified.
	pub fn get_init_path(&self) -> Option<&'s [u8]> {
		self.init
	}

	/// If `true`, the kernel doesn't print logs while booting.
	pub fn is_silent(&self) -> bool {
		self.silent
	}
}
