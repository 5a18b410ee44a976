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

//! The `dup` system call duplicates a file descriptor onto the lowest free
//! one.

use super::SyscallRet;
use crate::{
	errno::EResult,
	file::fd::DupConstraint,
	process::Process,
};

fn do_dup(oldfd: i32) -> EResult<usize> {
	let oldfd: usize = oldfd.try_into().map_err(|_| errno!(EBADF))?;
	Process::current().fdtable.duplicate(oldfd, DupConstraint::Any)
}

/// The `dup` system call.
pub fn dup(oldfd: i32) -> SyscallRet {
	do_dup(oldfd).into()
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{
		file::{O_RDONLY, S_IFREG},
		syscall::test::install_process,
	};
	use alloc::sync::Arc;

	#[test]
	fn dup_returns_lowest_free_descriptor() {
		let (fs, proc) = install_process();
		fs.seed("file", S_IFREG | 0o644);
		let a = crate::syscall::open(b"file\0".as_ptr(), O_RDONLY, 0);
		assert_eq!(a.errno, 0);
		let b = dup(a.ret as i32);
		assert_eq!(b.errno, 0);
		assert_eq!(b.ret, a.ret + 1);
		assert!(Arc::ptr_eq(
			&proc.fdtable.access(a.ret as usize).unwrap(),
			&proc.fdtable.access(b.ret as usize).unwrap()
		));
		assert_eq!(dup(999), SyscallRet::failure(errno!(EBADF)));
	}
}
