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

//! The `dup2` system call duplicates a file descriptor onto a chosen one,
//! closing whatever was there.

use super::SyscallRet;
use crate::{
	errno::EResult,
	file::fd::DupConstraint,
	process::Process,
};

fn do_dup2(oldfd: i32, newfd: i32) -> EResult<usize> {
	let oldfd: usize = oldfd.try_into().map_err(|_| errno!(EBADF))?;
	let newfd: usize = newfd.try_into().map_err(|_| errno!(EBADF))?;
	Process::current()
		.fdtable
		.duplicate(oldfd, DupConstraint::Fixed(newfd))
}

/// The `dup2` system call.
pub fn dup2(oldfd: i32, newfd: i32) -> SyscallRet {
	do_dup2(oldfd, newfd).into()
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{
		file::{O_RDONLY, S_IFREG},
		syscall::test::install_process,
	};

	#[test]
	fn dup2_installs_at_requested_index() {
		let (fs, proc) = install_process();
		fs.seed("file", S_IFREG | 0o644);
		let a = crate::syscall::open(b"file\0".as_ptr(), O_RDONLY, 0);
		assert_eq!(a.errno, 0);
		// Duplicating onto itself is the identity
		assert_eq!(dup2(a.ret as i32, a.ret as i32).ret, a.ret);
		let ret = dup2(a.ret as i32, 5);
		assert_eq!(ret, SyscallRet::success(5));
		assert!(proc.fdtable.access(5).is_ok());
		assert_eq!(dup2(-1, 5), SyscallRet::failure(errno!(EBADF)));
		assert_eq!(dup2(a.ret as i32, -1), SyscallRet::failure(errno!(EBADF)));
	}
}
