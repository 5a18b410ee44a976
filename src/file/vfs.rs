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

//! The VFS (Virtual FileSystem) aggregates every mounted filesystem into one
//! node tree.
//!
//! Directory nodes cache their children in a name-keyed map; entries are
//! materialized through the owning filesystem on lookup miss and never
//! removed during lookup, so readers tolerate concurrent insertion.
//!
//! Mounting installs another filesystem's root on top of a directory; path
//! resolution follows these `mount` links to their fixed point before
//! indexing into children.

use crate::{
	errno::EResult,
	file::{fs, fs::FilesystemOps, FileType, Mode, Stat, S_IFDIR},
	sync::Mutex,
};
use alloc::{
	string::{String, ToString},
	sync::Arc,
};
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};
use hashbrown::HashMap;
use spin::Once;

/// Directory payload of a [`Vnode`].
#[derive(Debug)]
pub struct Dir {
	/// The directory's children, keyed by name. Not exhaustive: entries are
	/// loaded on demand.
	children: Mutex<HashMap<String, Arc<Vnode>>>,
	/// The root of the filesystem mounted on top of this directory, if any.
	mount: Mutex<Option<Arc<Vnode>>>,
}

/// A node of the virtual filesystem.
pub struct Vnode {
	/// The node's name.
	pub name: String,
	/// The node's status.
	pub stat: Mutex<Stat>,
	/// The filesystem the node belongs to. The synthetic root has none.
	pub fs: Option<Arc<dyn FilesystemOps>>,
	/// Driver-private cookie, typically an inode number.
	pub fs_data: usize,

	/// The number of open references to the node.
	refcount: AtomicUsize,
	/// Directory payload, present iff the node is a directory.
	dir: Option<Dir>,
}

impl fmt::Debug for Vnode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Vnode")
			.field("name", &self.name)
			.field("stat", &self.stat)
			.field("fs_data", &self.fs_data)
			.field("refcount", &self.refcount)
			.field("dir", &self.dir)
			.finish()
	}
}

impl Vnode {
	/// Creates a non-directory node.
	pub fn new(name: &str, fs: Option<Arc<dyn FilesystemOps>>, fs_data: usize) -> Arc<Self> {
		Arc::new(Self {
			name: name.to_string(),
			stat: Mutex::new(Stat::default()),
			fs,
			fs_data,

			refcount: AtomicUsize::new(0),
			dir: None,
		})
	}

	/// Creates a directory node with an empty children map.
	pub fn new_dir(name: &str, fs: Option<Arc<dyn FilesystemOps>>, fs_data: usize) -> Arc<Self> {
		Arc::new(Self {
			name: name.to_string(),
			stat: Mutex::new(Stat {
				mode: S_IFDIR,
				..Default::default()
			}),
			fs,
			fs_data,

			refcount: AtomicUsize::new(0),
			dir: Some(Dir {
				children: Mutex::new(HashMap::new()),
				mount: Mutex::new(None),
			}),
		})
	}

	/// Returns the node's type, read from its mode.
	pub fn file_type(&self) -> Option<FileType> {
		FileType::from_mode(self.stat.lock().mode)
	}

	/// Tells whether the node is a directory.
	pub fn is_dir(&self) -> bool {
		self.file_type() == Some(FileType::Directory) && self.dir.is_some()
	}

	/// Returns the node's child with the given name, if cached.
	pub fn lookup_child(&self, name: &str) -> Option<Arc<Vnode>> {
		self.dir.as_ref()?.children.lock().get(name).cloned()
	}

	/// Inserts `child` into the node's children map.
	///
	/// Returns `ENOTDIR` if the node is not a directory.
	pub fn add_child(&self, child: Arc<Vnode>) -> EResult<()> {
		let dir = self.dir.as_ref().ok_or(errno!(ENOTDIR))?;
		dir.children.lock().insert(child.name.clone(), child);
		Ok(())
	}

	/// Installs `root` as the filesystem mounted on top of this directory.
	fn set_mount(&self, root: Arc<Vnode>) -> EResult<()> {
		let dir = self.dir.as_ref().ok_or(errno!(ENOTDIR))?;
		*dir.mount.lock() = Some(root);
		Ok(())
	}

	/// Takes an open reference on the node.
	pub fn acquire(&self) {
		self.refcount.fetch_add(1, Ordering::Relaxed);
	}

	/// The number of open references on the node.
	pub fn refcount(&self) -> usize {
		self.refcount.load(Ordering::Relaxed)
	}
}

/// Follows the chain of mounted filesystems on `node` to its fixed point.
pub fn mount_terminus(node: Arc<Vnode>) -> Arc<Vnode> {
	let mut cur = node;
	loop {
		let Some(dir) = cur.dir.as_ref() else {
			return cur;
		};
		let mount = dir.mount.lock().clone();
		match mount {
			Some(root) => cur = root,
			None => return cur,
		}
	}
}

/// The root of the VFS.
static ROOT: Once<Arc<Vnode>> = Once::new();

/// Initializes the VFS with a synthetic root directory, backed by no
/// filesystem. A real filesystem is expected to be mounted on top of it.
pub fn init() -> EResult<()> {
	println!("Creating the VFS root");
	ROOT.call_once(|| Vnode::new_dir("/", None, 0));
	Ok(())
}

/// Returns the VFS root.
pub fn root() -> Arc<Vnode> {
	ROOT.get().expect("VFS is not initialized").clone()
}

/// Resolves `path` starting from the directory `start`.
///
/// Path components are `/`-separated; empty components are skipped, so the
/// caller handles a leading `/` by choosing the process root as `start`.
/// Each traversed component must be a directory. Children missing from the
/// cache are materialized through the owning filesystem.
pub fn resolve(start: &Arc<Vnode>, path: &str) -> EResult<Arc<Vnode>> {
	let mut cur = mount_terminus(start.clone());
	for component in path.split('/').filter(|c| !c.is_empty()) {
		if cur.file_type() != Some(FileType::Directory) {
			return Err(errno!(ENOTDIR));
		}
		cur = mount_terminus(cur);
		let child = match cur.lookup_child(component) {
			Some(child) => child,
			None => {
				// Ask the filesystem to materialize the entry
				let fs = cur.fs.clone().ok_or(errno!(ENOENT))?;
				fs.open(&cur, component)?;
				cur.lookup_child(component).ok_or(errno!(ENOENT))?
			}
		};
		cur = child;
	}
	Ok(cur)
}

/// Resolves `path` from `start` and takes an open reference on the result.
pub fn open(start: &Arc<Vnode>, path: &str) -> EResult<Arc<Vnode>> {
	let node = resolve(start, path)?;
	node.acquire();
	Ok(node)
}

/// Drops an open reference on `node`. The filesystem's `close` runs when the
/// last reference is dropped.
pub fn close(node: &Arc<Vnode>) -> EResult<()> {
	let prev = node.refcount.fetch_sub(1, Ordering::Relaxed);
	debug_assert!(prev > 0, "closing a node that is not open");
	if prev == 1 {
		if let Some(fs) = &node.fs {
			fs.close(node)?;
		}
	}
	Ok(())
}

/// Creates the file at `path`, resolved from `start`, with the given mode.
///
/// The parent must resolve to a directory and the child name must not
/// already exist. The new node is returned without an open reference.
pub fn create(start: &Arc<Vnode>, path: &str, mode: Mode) -> EResult<Arc<Vnode>> {
	let path = path.trim_end_matches('/');
	let (parent_path, name) = match path.rsplit_once('/') {
		Some((parent, name)) => (parent, name),
		None => ("", path),
	};
	if name.is_empty() {
		return Err(errno!(ENOENT));
	}
	let parent = resolve(start, parent_path)?;
	let parent = mount_terminus(parent);
	if !parent.is_dir() {
		return Err(errno!(ENOTDIR));
	}
	// The name must not exist, in the cache or on the filesystem
	if parent.lookup_child(name).is_some() {
		return Err(errno!(EEXIST));
	}
	let fs = parent.fs.clone().ok_or(errno!(ENODEV))?;
	match fs.open(&parent, name) {
		Ok(()) => return Err(errno!(EEXIST)),
		Err(errno) if errno == errno!(ENOENT) => {}
		Err(errno) => return Err(errno),
	}
	let node = fs.create(&parent, name, mode)?;
	parent.add_child(node.clone())?;
	Ok(node)
}

/// Mounts the filesystem registered under `fs_name` on the directory at
/// `mount_path`.
///
/// Arguments:
/// - `start` is the directory paths are resolved from.
/// - `device`, when given and non-empty, is the path to the backing device.
/// - `flags` and `fs_info` are handed to the driver.
///
/// Returns `ENODEV` if no filesystem is registered under the name and
/// `ENOTDIR` if the mount target is not a directory.
pub fn mount(
	start: &Arc<Vnode>,
	device: Option<&str>,
	mount_path: &str,
	fs_name: &str,
	flags: u32,
	fs_info: usize,
) -> EResult<()> {
	let ops = fs::lookup(fs_name).ok_or(errno!(ENODEV))?;
	let dev = match device {
		Some(path) if !path.is_empty() => Some(resolve(start, path)?),
		Some(_) => Some(start.clone()),
		None => None,
	};
	let target = mount_terminus(resolve(start, mount_path)?);
	if !target.is_dir() {
		return Err(errno!(ENOTDIR));
	}
	let fs_root = ops.mount(dev, flags, fs_info)?;
	target.set_mount(fs_root)
}

#[cfg(test)]
pub(crate) mod test {
	use super::*;
	use crate::file::S_IFREG;
	use alloc::sync::Weak;

	/// An in-memory filesystem for tests. Nodes are materialized from
	/// `backing` on demand, so lazy lookup paths are exercised.
	pub(crate) struct TestFs {
		this: Weak<TestFs>,
		/// Entries known to the backing store but not yet in any children
		/// map, keyed by name.
		backing: Mutex<HashMap<String, Mode>>,
		/// The number of times `close` ran.
		pub closes: AtomicUsize,
	}

	impl TestFs {
		pub fn new() -> Arc<Self> {
			Arc::new_cyclic(|this| Self {
				this: this.clone(),
				backing: Mutex::new(HashMap::new()),
				closes: AtomicUsize::new(0),
			})
		}

		pub fn seed(&self, name: &str, mode: Mode) {
			self.backing.lock().insert(name.to_string(), mode);
		}

		pub(crate) fn make_node(&self, name: &str, mode: Mode) -> Arc<Vnode> {
			let fs = self.this.upgrade().map(|fs| fs as Arc<dyn FilesystemOps>);
			let node = if mode & S_IFDIR == S_IFDIR {
				Vnode::new_dir(name, fs, 0)
			} else {
				Vnode::new(name, fs, 0)
			};
			node.stat.lock().mode = mode;
			node
		}
	}

	impl FilesystemOps for TestFs {
		fn mount(
			&self,
			_dev: Option<Arc<Vnode>>,
			_flags: u32,
			_fs_info: usize,
		) -> EResult<Arc<Vnode>> {
			Ok(self.make_node("", S_IFDIR | 0o755))
		}

		fn open(&self, parent: &Arc<Vnode>, name: &str) -> EResult<()> {
			let mode = *self.backing.lock().get(name).ok_or(errno!(ENOENT))?;
			parent.add_child(self.make_node(name, mode))
		}

		fn close(&self, _node: &Vnode) -> EResult<()> {
			self.closes.fetch_add(1, Ordering::Relaxed);
			Ok(())
		}

		fn create(&self, _parent: &Arc<Vnode>, name: &str, mode: Mode) -> EResult<Arc<Vnode>> {
			Ok(self.make_node(name, mode))
		}
	}

	fn tree() -> (Arc<TestFs>, Arc<Vnode>) {
		let fs = TestFs::new();
		let root = fs.make_node("/", S_IFDIR | 0o755);
		let etc = fs.make_node("etc", S_IFDIR | 0o755);
		let passwd = fs.make_node("passwd", S_IFREG | 0o644);
		etc.add_child(passwd).unwrap();
		root.add_child(etc).unwrap();
		(fs, root)
	}

	#[test]
	fn resolve_cached_children() {
		let (_fs, root) = tree();
		let node = resolve(&root, "etc/passwd").unwrap();
		assert_eq!(node.name, "passwd");
		assert_eq!(node.file_type(), Some(FileType::Regular));
	}

	#[test]
	fn resolve_skips_empty_components() {
		let (_fs, root) = tree();
		assert_eq!(resolve(&root, "/etc").unwrap().name, "etc");
		assert_eq!(resolve(&root, "etc//passwd").unwrap().name, "passwd");
		// The empty path is the starting directory itself
		assert_eq!(resolve(&root, "").unwrap().name, "/");
	}

	#[test]
	fn resolve_through_file_fails() {
		let (_fs, root) = tree();
		assert_eq!(
			resolve(&root, "etc/passwd/oops").unwrap_err(),
			errno!(ENOTDIR)
		);
	}

	#[test]
	fn resolve_materializes_from_backing() {
		let (fs, root) = tree();
		fs.seed("hosts", S_IFREG | 0o644);
		let etc = resolve(&root, "etc").unwrap();
		assert!(etc.lookup_child("hosts").is_none());
		let node = resolve(&root, "etc/hosts").unwrap();
		assert_eq!(node.name, "hosts");
		// Now cached
		assert!(etc.lookup_child("hosts").is_some());
	}

	#[test]
	fn resolve_missing_fails() {
		let (_fs, root) = tree();
		assert_eq!(resolve(&root, "etc/shadow").unwrap_err(), errno!(ENOENT));
	}

	#[test]
	fn open_close_refcount() {
		let (fs, root) = tree();
		let node = open(&root, "etc/passwd").unwrap();
		assert_eq!(node.refcount(), 1);
		let again = open(&root, "etc/passwd").unwrap();
		assert_eq!(again.refcount(), 2);
		close(&node).unwrap();
		assert_eq!(fs.closes.load(Ordering::Relaxed), 0);
		close(&again).unwrap();
		// The driver's close ran exactly once, at refcount zero
		assert_eq!(fs.closes.load(Ordering::Relaxed), 1);
	}

	#[test]
	fn create_new_file() {
		let (_fs, root) = tree();
		let node = create(&root, "etc/motd", S_IFREG | 0o644).unwrap();
		assert_eq!(node.name, "motd");
		assert_eq!(resolve(&root, "etc/motd").unwrap().name, "motd");
	}

	#[test]
	fn create_existing_fails() {
		let (fs, root) = tree();
		assert_eq!(
			create(&root, "etc/passwd", S_IFREG | 0o644).unwrap_err(),
			errno!(EEXIST)
		);
		// Entries only present on the backing store also count
		fs.seed("hosts", S_IFREG | 0o644);
		assert_eq!(
			create(&root, "etc/hosts", S_IFREG | 0o644).unwrap_err(),
			errno!(EEXIST)
		);
	}

	#[test]
	fn mount_and_resolve_across() {
		let (fs, root) = tree();
		crate::file::fs::register("vfstestfs", fs.clone() as Arc<dyn FilesystemOps>);
		let mnt = fs.make_node("mnt", S_IFDIR | 0o755);
		root.add_child(mnt).unwrap();
		mount(&root, None, "mnt", "vfstestfs", 0, 0).unwrap();
		// Files created under the mountpoint land in the mounted filesystem
		let target = resolve(&root, "mnt").unwrap();
		let terminus = mount_terminus(target.clone());
		assert!(!Arc::ptr_eq(&target, &terminus));
		create(&root, "mnt/inside", S_IFREG | 0o644).unwrap();
		assert!(terminus.lookup_child("inside").is_some());
		assert_eq!(resolve(&root, "mnt/inside").unwrap().name, "inside");
	}

	#[test]
	fn mount_unknown_fs_fails() {
		let (_fs, root) = tree();
		assert_eq!(
			mount(&root, None, "etc", "no-such-fs", 0, 0).unwrap_err(),
			errno!(ENODEV)
		);
	}

	#[test]
	fn mount_on_file_fails() {
		let (fs, root) = tree();
		crate::file::fs::register("vfstestfs2", fs.clone() as Arc<dyn FilesystemOps>);
		assert_eq!(
			mount(&root, None, "etc/passwd", "vfstestfs2", 0, 0).unwrap_err(),
			errno!(ENOTDIR)
		);
	}
}
