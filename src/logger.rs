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

//! Kernel logging.
//!
//! Logs are kept in a ring buffer regardless of whether they are shown, so
//! that early messages survive until a console is registered. If the logger
//! is set as silent, logs are stored but not forwarded to the console.

use crate::sync::IntMutex;
use core::fmt;
use spin::Once;

/// The size of the kernel logs buffer in bytes.
const LOGS_SIZE: usize = 65536;

/// The kernel's logger.
pub static LOGGER: IntMutex<Logger> = IntMutex::new(Logger::new());

/// Sink the logger forwards to, typically a serial port or a terminal.
pub trait Console: Send + Sync {
	/// Writes the given bytes to the console.
	fn write(&self, buf: &[u8]);
}

/// The registered console.
static CONSOLE: Once<&'static dyn Console> = Once::new();

/// Registers the console logs are forwarded to.
pub fn init(console: &'static dyn Console) {
	CONSOLE.call_once(|| console);
}

/// Kernel logger, storing logs and forwarding them to the console.
pub struct Logger {
	/// Tells whether messages are forwarded to the console.
	pub silent: bool,

	/// The ring buffer storing the logs.
	buf: [u8; LOGS_SIZE],
	/// Offset at which the next write happens.
	write_head: usize,
	/// The number of valid bytes in the buffer.
	len: usize,
}

impl Logger {
	/// Creates a new instance.
	#[allow(clippy::new_without_default)]
	pub const fn new() -> Self {
		Self {
			silent: false,

			buf: [0; LOGS_SIZE],
			write_head: 0,
			len: 0,
		}
	}

	/// Pushes the given bytes onto the logs buffer, overwriting the oldest
	/// logs if the buffer is full.
	pub fn push(&mut self, s: &[u8]) {
		for b in s {
			self.buf[self.write_head] = *b;
			self.write_head = (self.write_head + 1) % LOGS_SIZE;
		}
		self.len = usize::min(self.len + s.len(), LOGS_SIZE);
	}

	/// The number of bytes of logs currently stored.
	pub fn len(&self) -> usize {
		self.len
	}

	/// Tells whether the buffer holds no log.
	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// Copies the stored logs into `out`, oldest first, and returns the
	/// number of bytes written.
	pub fn read(&self, out: &mut [u8]) -> usize {
		let n = usize::min(self.len, out.len());
		let start = (self.write_head + LOGS_SIZE - self.len) % LOGS_SIZE;
		for (i, b) in out[..n].iter_mut().enumerate() {
			*b = self.buf[(start + i) % LOGS_SIZE];
		}
		n
	}
}

impl fmt::Write for Logger {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		self.push(s.as_bytes());
		if !self.silent {
			if let Some(console) = CONSOLE.get() {
				console.write(s.as_bytes());
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn push_read() {
		let mut logger = Logger::new();
		logger.push(b"hello");
		logger.push(b" world");
		let mut out = [0u8; 32];
		let n = logger.read(&mut out);
		assert_eq!(&out[..n], b"hello world");
	}

	#[test]
	fn overflow_keeps_newest() {
		let mut logger = Logger::new();
		logger.push(&[b'a'; LOGS_SIZE]);
		logger.push(b"xyz");
		assert_eq!(logger.len(), LOGS_SIZE);
		let mut out = alloc::vec![0u8; LOGS_SIZE];
		let n = logger.read(&mut out);
		assert_eq!(n, LOGS_SIZE);
		assert_eq!(&out[n - 3..n], b"xyz");
		assert_eq!(out[0], b'a');
	}
}
