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

//! The `chroot` system call changes the process' root directory.

use super::SyscallRet;
use crate::{errno::EResult, file::vfs, process::Process};

fn do_chroot(path: *const u8) -> EResult<usize> {
	let path = super::copy_string_from_user(path)?;
	let proc = Process::current();
	let base = if path.starts_with('/') {
		proc.root.lock().clone()
	} else {
		proc.cwd.lock().clone()
	};
	let base = base.ok_or(errno!(ENOENT))?;
	let node = vfs::open(&base, &path)?;
	if !node.is_dir() {
		let _ = vfs::close(&node);
		return Err(errno!(ENOTDIR));
	}
	// Install the new root; the reference taken by the open above is the one
	// the process keeps
	let old = proc.root.lock().replace(node);
	if let Some(old) = old {
		let _ = vfs::close(&old);
	}
	Ok(0)
}

/// The `chroot` system call.
pub fn chroot(path: *const u8) -> SyscallRet {
	do_chroot(path).into()
}
