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

//! Processes.
//!
//! A process bundles the resources threads run against: credentials, the
//! root and current directories, and the file descriptor table. Processes
//! form a tree through parent/children edges; the parent edge is weak so the
//! tree does not leak.

pub mod pid;
pub mod regs;
pub mod scheduler;
pub mod thread;

use crate::{
	file::{fd::FdTable, vfs, vfs::Vnode, Mode},
	sync::Mutex,
};
use alloc::{
	sync::{Arc, Weak},
	vec::Vec,
};
use pid::Pid;

/// Credentials and file creation mask of a process.
#[derive(Clone, Debug)]
pub struct Credentials {
	/// The process' user ID.
	pub uid: u32,
	/// The process' group ID.
	pub gid: u32,
	/// Mask of permissions cleared on file creation.
	pub umask: Mode,
}

impl Default for Credentials {
	fn default() -> Self {
		Self {
			uid: 0,
			gid: 0,
			umask: 0o022,
		}
	}
}

/// A process.
pub struct Process {
	/// The process' ID.
	pub pid: Pid,

	/// The parent process.
	parent: Mutex<Weak<Process>>,
	/// The child processes.
	children: Mutex<Vec<Arc<Process>>>,

	/// The process' credentials.
	pub creds: Mutex<Credentials>,
	/// The root directory, holding a reference on the node.
	pub root: Mutex<Option<Arc<Vnode>>>,
	/// The current working directory, holding a reference on the node.
	pub cwd: Mutex<Option<Arc<Vnode>>>,
	/// The process' file descriptor table.
	pub fdtable: FdTable,
}

impl Process {
	/// Creates a process shell with no parent, no directories and an empty
	/// file descriptor table.
	pub fn new() -> Arc<Self> {
		Arc::new(Self {
			pid: pid::next(),

			parent: Mutex::new(Weak::new()),
			children: Mutex::new(Vec::new()),

			creds: Mutex::new(Credentials::default()),
			root: Mutex::new(None),
			cwd: Mutex::new(None),
			fdtable: FdTable::new(),
		})
	}

	/// Returns the process the current CPU is running.
	///
	/// Panics if the CPU is not running a process; syscalls can rely on one
	/// being present.
	pub fn current() -> Arc<Self> {
		scheduler::core_local()
			.thread()
			.and_then(|thread| thread.proc.clone())
			.expect("no current process")
	}

	/// Returns the parent process, if it is still alive.
	pub fn parent(&self) -> Option<Arc<Process>> {
		self.parent.lock().upgrade()
	}

	/// Returns the number of children of the process.
	pub fn children_count(&self) -> usize {
		self.children.lock().len()
	}

	/// Returns the children of the process.
	pub fn children(&self) -> Vec<Arc<Process>> {
		self.children.lock().clone()
	}

	/// Links `child` under `parent` in the process tree.
	pub fn link_child(parent: &Arc<Process>, child: &Arc<Process>) {
		*child.parent.lock() = Arc::downgrade(parent);
		parent.children.lock().push(child.clone());
	}
}

impl Drop for Process {
	fn drop(&mut self) {
		// Release the directory references held by the process
		if let Some(root) = self.root.lock().take() {
			let _ = vfs::close(&root);
		}
		if let Some(cwd) = self.cwd.lock().take() {
			let _ = vfs::close(&cwd);
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn process_tree() {
		let parent = Process::new();
		let child = Process::new();
		Process::link_child(&parent, &child);
		assert_eq!(child.parent().unwrap().pid, parent.pid);
		assert_eq!(parent.children_count(), 1);
		assert_ne!(parent.pid, child.pid);
	}

	#[test]
	fn parent_edge_is_weak() {
		let child = {
			let parent = Process::new();
			let child = Process::new();
			Process::link_child(&parent, &child);
			child
		};
		// The parent died: the edge must not dangle nor leak
		assert!(child.parent().is_none());
	}
}
