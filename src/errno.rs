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

//! Unix errno utilities.
//!
//! Every fallible operation of the kernel returns an [`EResult`]. The syscall
//! layer is responsible for turning the errno into the userspace-visible
//! `(ret, errno)` pair.

/// Type representing a Unix errno.
pub type Errno = i32;

/// Operation not permitted.
pub const EPERM: Errno = 1;
/// No such file or directory.
pub const ENOENT: Errno = 2;
/// I/O error.
pub const EIO: Errno = 5;
/// No such device or address.
pub const ENXIO: Errno = 6;
/// Bad file descriptor.
pub const EBADF: Errno = 9;
/// Resource temporarily unavailable.
pub const EAGAIN: Errno = 11;
/// Not enough memory.
pub const ENOMEM: Errno = 12;
/// Permission denied.
pub const EACCES: Errno = 13;
/// Bad address.
pub const EFAULT: Errno = 14;
/// Device or resource busy.
pub const EBUSY: Errno = 16;
/// File exists.
pub const EEXIST: Errno = 17;
/// No such device.
pub const ENODEV: Errno = 19;
/// Not a directory.
pub const ENOTDIR: Errno = 20;
/// Is a directory.
pub const EISDIR: Errno = 21;
/// Invalid argument.
pub const EINVAL: Errno = 22;
/// Too many open files in system.
pub const ENFILE: Errno = 23;
/// Too many open files.
pub const EMFILE: Errno = 24;
/// No space left on device.
pub const ENOSPC: Errno = 28;
/// Filename too long.
pub const ENAMETOOLONG: Errno = 36;
/// Function not implemented.
pub const ENOSYS: Errno = 38;

/// Result type for operations that may fail with an errno.
pub type EResult<T> = core::result::Result<T, Errno>;

/// Expands to the errno with the given name.
///
/// This macro exists to make call sites read the same regardless of where the
/// constants live.
#[macro_export]
macro_rules! errno {
	($name:ident) => {
		$crate::errno::$name
	};
}

/// Returns the name of the given errno, for logging purposes.
pub fn name(errno: Errno) -> &'static str {
	match errno {
		EPERM => "EPERM",
		ENOENT => "ENOENT",
		EIO => "EIO",
		ENXIO => "ENXIO",
		EBADF => "EBADF",
		EAGAIN => "EAGAIN",
		ENOMEM => "ENOMEM",
		EACCES => "EACCES",
		EFAULT => "EFAULT",
		EBUSY => "EBUSY",
		EEXIST => "EEXIST",
		ENODEV => "ENODEV",
		ENOTDIR => "ENOTDIR",
		EISDIR => "EISDIR",
		EINVAL => "EINVAL",
		ENFILE => "ENFILE",
		EMFILE => "EMFILE",
		ENOSPC => "ENOSPC",
		ENAMETOOLONG => "ENAMETOOLONG",
		ENOSYS => "ENOSYS",
		_ => "unknown",
	}
}
