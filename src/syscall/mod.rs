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

//! System call implementations.
//!
//! Every pointer handed in by userspace is validated to lie strictly below
//! the end of the user half before it is dereferenced, and strings are
//! copied into kernel memory before use. Each call returns a
//! [`SyscallRet`] pair; `ret` is `-1` with `errno` set on failure.

pub mod chroot;
pub mod close;
pub mod dup;
pub mod dup2;
pub mod fork;
pub mod open;
pub mod openat;

pub use chroot::chroot;
pub use close::close;
pub use dup::dup;
pub use dup2::dup2;
pub use fork::fork;
pub use open::open;
pub use openat::openat;

use crate::{
	errno::{EResult, Errno},
	limits,
	memory::{VirtAddr, USER_SPACE_END},
};
use alloc::string::String;

/// The value pair returned to userspace by every system call.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SyscallRet {
	/// The call's return value, `-1` on failure.
	pub ret: isize,
	/// The call's errno, `0` on success.
	pub errno: Errno,
}

impl SyscallRet {
	/// A successful return with the given value.
	pub fn success(ret: usize) -> Self {
		Self {
			ret: ret as isize,
			errno: 0,
		}
	}

	/// A failed return with the given errno.
	pub fn failure(errno: Errno) -> Self {
		Self {
			ret: -1,
			errno,
		}
	}
}

impl From<EResult<usize>> for SyscallRet {
	fn from(res: EResult<usize>) -> Self {
		match res {
			Ok(ret) => Self::success(ret),
			Err(errno) => Self::failure(errno),
		}
	}
}

/// Copies a NUL-terminated string from userspace into kernel memory.
///
/// Returns `EFAULT` when the pointer does not lie strictly below the end of
/// the user half, and `ENAMETOOLONG` when no terminator shows up within
/// `PATH_MAX` bytes.
fn copy_string_from_user(ptr: *const u8) -> EResult<String> {
	if ptr.is_null() || VirtAddr::from(ptr) >= USER_SPACE_END {
		return Err(errno!(EFAULT));
	}
	let mut buf = alloc::vec::Vec::new();
	for i in 0..limits::PATH_MAX {
		let addr = VirtAddr::from(ptr) + i;
		if addr >= USER_SPACE_END {
			return Err(errno!(EFAULT));
		}
		let b = unsafe { (addr.0 as *const u8).read() };
		if b == 0 {
			return String::from_utf8(buf).map_err(|_| errno!(EINVAL));
		}
		buf.push(b);
	}
	Err(errno!(ENAMETOOLONG))
}
