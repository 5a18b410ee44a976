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

//! The `close` system call.

use super::SyscallRet;
use crate::{errno::EResult, process::Process};

fn do_close(fd: i32) -> EResult<usize> {
	let fd: usize = fd.try_into().map_err(|_| errno!(EBADF))?;
	Process::current().fdtable.free(fd)?;
	Ok(0)
}

/// The `close` system call.
pub fn close(fd: i32) -> SyscallRet {
	do_close(fd).into()
}
