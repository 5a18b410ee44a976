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

//! Filesystem operations and registration.
//!
//! A filesystem driver implements [`FilesystemOps`] and registers under a
//! name. `mount` looks drivers up by exact name match.

use crate::{
	errno::EResult,
	file::{vfs::Vnode, Mode},
	sync::Mutex,
};
use alloc::{string::String, sync::Arc};
use hashbrown::HashMap;
use spin::Lazy;

/// Operations table of a filesystem driver.
pub trait FilesystemOps: Send + Sync {
	/// Mounts an instance of the filesystem and returns its root directory
	/// node.
	///
	/// Arguments:
	/// - `dev` is the backing device's node, for filesystems that have one.
	/// - `flags` are the mount flags.
	/// - `fs_info` is driver-specific mount information.
	fn mount(&self, dev: Option<Arc<Vnode>>, flags: u32, fs_info: usize) -> EResult<Arc<Vnode>>;

	/// Materializes the child `name` of the directory `parent` into the
	/// parent's children map.
	///
	/// Returns `ENOENT` if the filesystem has no such entry.
	fn open(&self, parent: &Arc<Vnode>, name: &str) -> EResult<()>;

	/// Releases the driver state of `node`. Called exactly once, when the
	/// last open reference to the node is dropped.
	fn close(&self, node: &Vnode) -> EResult<()>;

	/// Creates the child `name` of the directory `parent` with the given
	/// mode and returns its node. The VFS links the node into the parent.
	fn create(&self, parent: &Arc<Vnode>, name: &str, mode: Mode) -> EResult<Arc<Vnode>>;

	/// Reads from `node` at offset `off` into `buf`, returning the number of
	/// bytes read.
	fn read(&self, _node: &Vnode, _off: u64, _buf: &mut [u8]) -> EResult<usize> {
		Err(errno!(ENOSYS))
	}

	/// Writes `buf` to `node` at offset `off`, returning the number of bytes
	/// written.
	fn write(&self, _node: &Vnode, _off: u64, _buf: &[u8]) -> EResult<usize> {
		Err(errno!(ENOSYS))
	}
}

/// The process-wide filesystem registry, keyed by name.
static FILESYSTEMS: Lazy<Mutex<HashMap<String, Arc<dyn FilesystemOps>>>> =
	Lazy::new(|| Mutex::new(HashMap::new()));

/// Registers the filesystem `ops` under `name`, replacing a previous
/// registration with the same name.
pub fn register(name: &str, ops: Arc<dyn FilesystemOps>) {
	FILESYSTEMS.lock().insert(String::from(name), ops);
}

/// Returns the filesystem registered under `name`.
pub fn lookup(name: &str) -> Option<Arc<dyn FilesystemOps>> {
	FILESYSTEMS.lock().get(name).cloned()
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::file::S_IFDIR;

	struct NullFs;

	impl FilesystemOps for NullFs {
		fn mount(
			&self,
			_dev: Option<Arc<Vnode>>,
			_flags: u32,
			_fs_info: usize,
		) -> EResult<Arc<Vnode>> {
			Ok(Vnode::new_dir("", None, 0))
		}

		fn open(&self, _parent: &Arc<Vnode>, _name: &str) -> EResult<()> {
			Err(errno!(ENOENT))
		}

		fn close(&self, _node: &Vnode) -> EResult<()> {
			Ok(())
		}

		fn create(&self, _parent: &Arc<Vnode>, name: &str, mode: Mode) -> EResult<Arc<Vnode>> {
			if mode & S_IFDIR != 0 {
				Ok(Vnode::new_dir(name, None, 0))
			} else {
				Ok(Vnode::new(name, None, 0))
			}
		}
	}

	#[test]
	fn register_lookup() {
		register("nullfs", Arc::new(NullFs));
		assert!(lookup("nullfs").is_some());
		assert!(lookup("no-such-fs").is_none());
	}
}
