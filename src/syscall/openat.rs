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

//! The `openat` system call opens a file relative to a directory
//! descriptor.

use super::SyscallRet;
use crate::{
	errno::EResult,
	file::{vfs, vfs::Vnode, FileType, Mode, AT_FDCWD, O_CREAT, O_DIRECTORY},
	process::Process,
};
use alloc::sync::Arc;

/// Resolves the node `path` refers to, creating it when `O_CREAT` is given
/// and it does not exist.
///
/// Returns the node, open, along with the flags to store on the descriptor:
/// after a successful create-retry, `O_CREAT` is cleared.
fn open_node(
	proc: &Arc<Process>,
	dirfd: i32,
	path: &str,
	mut flags: i32,
	mode: Mode,
) -> EResult<(Arc<Vnode>, i32)> {
	// Pick the resolution base: the process root for absolute paths, the
	// cwd or the directory descriptor otherwise
	let base = if path.starts_with('/') {
		proc.root.lock().clone().ok_or(errno!(ENOENT))?
	} else if dirfd == AT_FDCWD {
		proc.cwd.lock().clone().ok_or(errno!(ENOENT))?
	} else {
		let dirfd: usize = dirfd.try_into().map_err(|_| errno!(EBADF))?;
		let dir = proc.fdtable.access(dirfd)?;
		let node = dir.lock().node.clone().ok_or(errno!(EBADF))?;
		node
	};
	let node = match vfs::open(&base, path) {
		Ok(node) => node,
		Err(errno) if errno == errno!(ENOENT) && flags & O_CREAT != 0 => {
			let umask = proc.creds.lock().umask;
			vfs::create(&base, path, mode & !umask)?;
			flags &= !O_CREAT;
			// Retry exactly once, now that the file exists
			vfs::open(&base, path)?
		}
		Err(errno) => return Err(errno),
	};
	// Post-open checks
	let file_type = FileType::from_mode(node.stat.lock().mode);
	let res = if flags & O_DIRECTORY != 0 && file_type != Some(FileType::Directory) {
		Err(errno!(ENOTDIR))
	} else if file_type == Some(FileType::Socket) {
		Err(errno!(ENXIO))
	} else {
		Ok(())
	};
	if let Err(errno) = res {
		let _ = vfs::close(&node);
		return Err(errno);
	}
	Ok((node, flags))
}

fn do_openat(dirfd: i32, pathname: *const u8, flags: i32, mode: Mode) -> EResult<usize> {
	let path = super::copy_string_from_user(pathname)?;
	let proc = Process::current();
	// The descriptor is allocated first; until its node is attached, other
	// threads see it as closed
	let (idx, fd) = proc.fdtable.alloc()?;
	match open_node(&proc, dirfd, &path, flags, mode) {
		Ok((node, flags)) => {
			let mut inner = fd.lock();
			inner.flags = flags + 1;
			inner.offset = 0;
			inner.mode = node.stat.lock().mode;
			inner.node = Some(node);
			drop(inner);
			Ok(idx)
		}
		Err(errno) => {
			let _ = proc.fdtable.free(idx);
			Err(errno)
		}
	}
}

/// The `openat` system call.
pub fn openat(dirfd: i32, pathname: *const u8, flags: i32, mode: Mode) -> SyscallRet {
	do_openat(dirfd, pathname, flags, mode).into()
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{
		file::{O_RDONLY, O_WRONLY, S_IFDIR, S_IFREG, S_IFSOCK},
		syscall::test::install_process,
	};

	#[test]
	fn create_applies_umask_and_clears_o_creat() {
		let (_fs, proc) = install_process();
		let ret = openat(AT_FDCWD, b"newfile\0".as_ptr(), O_CREAT | O_WRONLY, 0o666);
		assert_eq!(ret.errno, 0);
		let fd = proc.fdtable.access(ret.ret as usize).unwrap();
		let inner = fd.lock();
		// Stored flags are biased by one and exclude O_CREAT
		assert_eq!(inner.flags, O_WRONLY + 1);
		assert_eq!(inner.offset, 0);
		let node = inner.node.as_ref().unwrap();
		// The default umask masks out group/other write bits
		assert_eq!(node.stat.lock().mode & 0o777, 0o644);
	}

	#[test]
	fn missing_file_without_o_creat_fails() {
		let (_fs, proc) = install_process();
		let ret = openat(AT_FDCWD, b"missing\0".as_ptr(), O_RDONLY, 0);
		assert_eq!(ret.ret, -1);
		assert_eq!(ret.errno, errno!(ENOENT));
		// The pre-allocated descriptor was released
		let (idx, _fd) = proc.fdtable.alloc().unwrap();
		assert_eq!(idx, 0);
	}

	#[test]
	fn o_directory_on_regular_file_fails() {
		let (fs, _proc) = install_process();
		fs.seed("file", S_IFREG | 0o644);
		let ret = openat(AT_FDCWD, b"file\0".as_ptr(), O_DIRECTORY, 0);
		assert_eq!(ret.errno, errno!(ENOTDIR));
	}

	#[test]
	fn socket_nodes_cannot_be_opened() {
		let (fs, _proc) = install_process();
		fs.seed("sock", S_IFSOCK | 0o644);
		let ret = openat(AT_FDCWD, b"sock\0".as_ptr(), O_RDONLY, 0);
		assert_eq!(ret.errno, errno!(ENXIO));
	}

	#[test]
	fn dirfd_is_the_resolution_base() {
		let (fs, proc) = install_process();
		// Build /etc/passwd, then open "passwd" relative to an fd on /etc
		let root = proc.root.lock().clone().unwrap();
		let etc = fs.make_node("etc", S_IFDIR | 0o755);
		etc.add_child(fs.make_node("passwd", S_IFREG | 0o644)).unwrap();
		root.add_child(etc).unwrap();
		let etc_fd = openat(AT_FDCWD, b"etc\0".as_ptr(), O_RDONLY, 0);
		assert_eq!(etc_fd.errno, 0);
		let ret = openat(etc_fd.ret as i32, b"passwd\0".as_ptr(), O_RDONLY, 0);
		assert_eq!(ret.errno, 0);
		let fd = proc.fdtable.access(ret.ret as usize).unwrap();
		assert_eq!(fd.lock().node.as_ref().unwrap().name, "passwd");
	}

	#[test]
	fn absolute_path_resolves_from_process_root() {
		let (fs, proc) = install_process();
		fs.seed("abs", S_IFREG | 0o644);
		let ret = openat(AT_FDCWD, b"/abs\0".as_ptr(), O_RDONLY, 0);
		assert_eq!(ret.errno, 0);
		let fd = proc.fdtable.access(ret.ret as usize).unwrap();
		assert_eq!(fd.lock().node.as_ref().unwrap().name, "abs");
	}
}
