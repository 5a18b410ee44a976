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

//! File descriptor tables.
//!
//! A file descriptor is an index into the process' table of open-file slots.
//! Slots are reference counted: `fork` and `dup` make several table entries
//! share one slot, so the file offset is shared as POSIX requires. The
//! backing node is closed exactly once, when the last entry drops the slot.
//!
//! Lock order: table lock before slot lock, never two slot locks at once,
//! and the VFS is never entered with either lock held.

use crate::{
	errno::EResult,
	file::{vfs, vfs::Vnode, Mode},
	limits,
	sync::{mutex::MutexGuard, Mutex},
};
use alloc::{sync::Arc, vec::Vec};

/// The initial number of slots in a table.
const INIT_SIZE: usize = 3;

/// Mutable state of an open-file slot.
#[derive(Debug)]
pub struct FdInner {
	/// The number of table entries pointing at this slot.
	refcount: usize,

	/// The open flags, stored with `1` added so that `0` means unset.
	pub flags: i32,
	/// The current file offset.
	pub offset: u64,
	/// The node's mode, cached at open time.
	pub mode: Mode,
	/// The open node. A slot without a node is treated as empty.
	pub node: Option<Arc<Vnode>>,
}

/// An open-file slot, shared between the table entries that duplicate it.
#[derive(Debug)]
pub struct Fd(Mutex<FdInner>);

impl Fd {
	fn new() -> Arc<Self> {
		Arc::new(Self(Mutex::new(FdInner {
			refcount: 1,

			flags: 0,
			offset: 0,
			mode: 0,
			node: None,
		})))
	}

	/// Locks the slot.
	pub fn lock(&self) -> MutexGuard<'_, FdInner> {
		self.0.lock()
	}

	/// Drops one table reference; returns the node to close if this was the
	/// last one.
	fn release(&self) -> Option<Arc<Vnode>> {
		let mut inner = self.0.lock();
		inner.refcount -= 1;
		if inner.refcount > 0 {
			return None;
		}
		inner.node.take()
	}
}

/// Indexed state of a table.
struct FdTableInner {
	/// The slots, indexed by file descriptor.
	slots: Vec<Option<Arc<Fd>>>,
	/// Index of the first slot that may be empty.
	first_free: usize,
}

impl FdTableInner {
	/// Returns the lowest empty index at or after the hint, growing the
	/// table by one slot when it is full.
	fn find_or_grow(&mut self) -> EResult<usize> {
		let found = (self.first_free..self.slots.len()).find(|i| self.slots[*i].is_none());
		match found {
			Some(i) => Ok(i),
			None => {
				if self.slots.len() >= limits::OPEN_MAX {
					return Err(errno!(EMFILE));
				}
				self.slots.try_reserve(1).map_err(|_| errno!(ENOMEM))?;
				self.slots.push(None);
				Ok(self.slots.len() - 1)
			}
		}
	}
}

/// Constraint on the index returned by [`FdTable::duplicate`].
#[derive(Clone, Copy, Debug)]
pub enum DupConstraint {
	/// Use the lowest free index (`dup`).
	Any,
	/// Use exactly the given index (`dup2`).
	Fixed(usize),
}

/// A per-process table of file descriptors.
pub struct FdTable(Mutex<FdTableInner>);

impl FdTable {
	/// Creates a table with the default number of empty slots.
	pub fn new() -> Self {
		let mut slots = Vec::new();
		slots.resize(INIT_SIZE, None);
		Self(Mutex::new(FdTableInner {
			slots,
			first_free: 0,
		}))
	}

	/// The number of slots in the table, empty or not.
	pub fn fdcount(&self) -> usize {
		self.0.lock().slots.len()
	}

	/// Allocates a fresh slot at the lowest free index.
	///
	/// The slot is returned with a single reference and no node; the caller
	/// initializes it. Until the node is set, other callers see the
	/// descriptor as closed.
	pub fn alloc(&self) -> EResult<(usize, Arc<Fd>)> {
		let mut table = self.0.lock();
		let idx = table.find_or_grow()?;
		let fd = Fd::new();
		table.slots[idx] = Some(fd.clone());
		table.first_free = idx;
		Ok((idx, fd))
	}

	/// Returns the slot bound to the descriptor `idx`.
	///
	/// Returns `EBADF` if the index is out of range, the slot is empty or no
	/// node is attached yet.
	pub fn access(&self, idx: usize) -> EResult<Arc<Fd>> {
		let table = self.0.lock();
		let slot = table
			.slots
			.get(idx)
			.and_then(|slot| slot.clone())
			.ok_or(errno!(EBADF))?;
		if slot.0.lock().node.is_none() {
			return Err(errno!(EBADF));
		}
		Ok(slot)
	}

	/// Closes the descriptor `idx`: the entry is removed from the table, and
	/// the node is closed if this was the last reference to the slot.
	pub fn free(&self, idx: usize) -> EResult<()> {
		let slot = {
			let mut table = self.0.lock();
			let entry = table.slots.get_mut(idx).ok_or(errno!(EBADF))?;
			let slot = entry.take().ok_or(errno!(EBADF))?;
			if idx < table.first_free {
				table.first_free = idx;
			}
			slot
		};
		// The table lock is dropped: closing may call into the VFS
		match slot.release() {
			Some(node) => vfs::close(&node),
			None => Ok(()),
		}
	}

	/// Clones the table into `dst` for process forking: same size, every
	/// non-empty entry sharing its slot with the source.
	///
	/// `dst` must not be reachable by other threads yet.
	pub fn clone_into(&self, dst: &FdTable) -> EResult<()> {
		let src = self.0.lock();
		let mut dst = dst.0.lock();
		dst.slots.clear();
		dst.slots
			.try_reserve(src.slots.len().max(INIT_SIZE))
			.map_err(|_| errno!(ENOMEM))?;
		for slot in &src.slots {
			if let Some(fd) = slot {
				fd.0.lock().refcount += 1;
			}
			dst.slots.push(slot.clone());
		}
		if dst.slots.len() < INIT_SIZE {
			dst.slots.resize(INIT_SIZE, None);
		}
		dst.first_free = 0;
		Ok(())
	}

	/// Duplicates the descriptor `src` according to `constraint`,
	/// implementing both `dup` and `dup2`.
	///
	/// `dup2` onto the source descriptor returns it unchanged; `dup2` onto
	/// an occupied descriptor closes the displaced slot exactly once.
	///
	/// Returns the new descriptor index.
	pub fn duplicate(&self, src: usize, constraint: DupConstraint) -> EResult<usize> {
		if let DupConstraint::Fixed(dst) = constraint {
			if dst >= limits::OPEN_MAX {
				return Err(errno!(EBADF));
			}
		}
		let src_fd = self.access(src)?;
		match constraint {
			DupConstraint::Fixed(dst) if dst == src => Ok(src),
			DupConstraint::Any => {
				let mut table = self.0.lock();
				let idx = table.find_or_grow()?;
				src_fd.0.lock().refcount += 1;
				table.slots[idx] = Some(src_fd.clone());
				table.first_free = idx;
				Ok(idx)
			}
			DupConstraint::Fixed(dst) => {
				let displaced = {
					let mut table = self.0.lock();
					if dst >= table.slots.len() {
						let additional = dst + 1 - table.slots.len();
						table
							.slots
							.try_reserve(additional)
							.map_err(|_| errno!(ENOMEM))?;
						table.slots.resize(dst + 1, None);
					}
					let displaced = table.slots[dst].take();
					src_fd.0.lock().refcount += 1;
					table.slots[dst] = Some(src_fd.clone());
					displaced
				};
				if let Some(old) = displaced {
					if let Some(node) = old.release() {
						vfs::close(&node)?;
					}
				}
				Ok(dst)
			}
		}
	}
}

impl Default for FdTable {
	fn default() -> Self {
		Self::new()
	}
}
