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

//! Mapping descriptor cache.
//!
//! Descriptors are linked into several places at once (their list, transient
//! locals during splice operations), so they must never move. They live in
//! page-sized slabs chained together, each slab carrying a fixed array of
//! slots. A slot is in use iff its slab back-pointer is set; `free_count`
//! equals the number of vacant slots at all times.
//!
//! Slabs are never reclaimed.

use super::list::Mapping;
use crate::{
	errno::EResult,
	memory::{phys, PAGE_SIZE},
	sync::{Mutex, Spinlock},
};
use core::{
	mem,
	ptr::{self, addr_of, addr_of_mut, NonNull},
};

/// Header at the beginning of each slab.
#[repr(C)]
pub(super) struct SlabHeader {
	/// Protects the slots of this slab.
	lock: Spinlock,
	/// Index of the first slot that may be vacant.
	first_free: usize,
	/// The number of vacant slots.
	free_count: usize,
	/// The next slab in the chain.
	next: Option<NonNull<Slab>>,
}

/// The number of descriptors per slab.
pub(super) const SLAB_ENTRY_COUNT: usize =
	(PAGE_SIZE - mem::size_of::<SlabHeader>()) / mem::size_of::<Mapping>();

/// A page-sized slab of mapping descriptors.
#[repr(C)]
pub(super) struct Slab {
	header: SlabHeader,
	slots: [Mapping; SLAB_ENTRY_COUNT],
}

const _: () = assert!(mem::size_of::<Slab>() <= PAGE_SIZE);

/// Head of the slab chain.
static CHAIN: Mutex<Chain> = Mutex::new(Chain {
	head: None,
});

struct Chain {
	head: Option<NonNull<Slab>>,
}

// Slabs are only reached under the chain lock or through back-pointers of
// descriptors owned by a locked list
unsafe impl Send for Chain {}

/// Allocates a new slab from the higher-half direct map.
fn new_slab() -> EResult<NonNull<Slab>> {
	let slab = phys::hhdm_alloc(1)?.cast::<Slab>();
	unsafe {
		let s = slab.as_ptr();
		ptr::write(
			addr_of_mut!((*s).header),
			SlabHeader {
				lock: Spinlock::new(),
				first_free: 0,
				free_count: SLAB_ENTRY_COUNT,
				next: None,
			},
		);
		for i in 0..SLAB_ENTRY_COUNT {
			ptr::write(addr_of_mut!((*s).slots[i]), Mapping::vacant());
		}
	}
	Ok(slab)
}

/// Claims a vacant slot in `slab`, if any.
///
/// # Safety
///
/// `slab` must point to an initialized slab.
unsafe fn slab_alloc(slab: NonNull<Slab>) -> Option<NonNull<Mapping>> {
	let s = slab.as_ptr();
	(*s).header.lock.lock();
	let mut found = None;
	if (*s).header.free_count > 0 {
		for i in (*s).header.first_free..SLAB_ENTRY_COUNT {
			let slot = addr_of_mut!((*s).slots[i]);
			if (*slot).cache.is_none() {
				(*slot).cache = Some(slab);
				(*s).header.first_free = i;
				(*s).header.free_count -= 1;
				found = NonNull::new(slot);
				break;
			}
		}
	}
	(*s).header.lock.unlock();
	found
}

/// Allocates a mapping descriptor, growing the slab chain if every slab is
/// full.
///
/// The returned descriptor is vacant except for its back-pointer; the caller
/// initializes it.
pub(super) fn alloc_mapping() -> EResult<NonNull<Mapping>> {
	let mut chain = CHAIN.lock();
	let mut last = None;
	let mut cur = chain.head;
	while let Some(slab) = cur {
		if let Some(mapping) = unsafe { slab_alloc(slab) } {
			return Ok(mapping);
		}
		last = Some(slab);
		cur = unsafe { (*slab.as_ptr()).header.next };
	}
	// Every slab is full
	let slab = new_slab()?;
	let mapping = unsafe { slab_alloc(slab) }.expect("fresh slab has no vacant slot");
	match last {
		Some(last) => unsafe {
			(*last.as_ptr()).header.next = Some(slab);
		},
		None => chain.head = Some(slab),
	}
	Ok(mapping)
}

/// Returns the descriptor `mapping` to its slab.
///
/// # Safety
///
/// `mapping` must have been returned by [`alloc_mapping`] and must not be
/// linked anywhere anymore.
pub(super) unsafe fn free_mapping(mapping: NonNull<Mapping>) {
	let slab = mapping
		.as_ref()
		.cache
		.expect("freeing a vacant mapping descriptor");
	let s = slab.as_ptr();
	(*s).header.lock.lock();
	ptr::write(mapping.as_ptr(), Mapping::vacant());
	(*s).header.free_count += 1;
	let index =
		(mapping.as_ptr() as usize - addr_of!((*s).slots) as usize) / mem::size_of::<Mapping>();
	if index < (*s).header.first_free {
		(*s).header.first_free = index;
	}
	(*s).header.lock.unlock();
}

#[cfg(test)]
mod test {
	use super::*;

	/// Counts vacant slots the slow way, to check the accounting.
	unsafe fn vacant_slots(slab: NonNull<Slab>) -> usize {
		let s = slab.as_ptr();
		(0..SLAB_ENTRY_COUNT)
			.filter(|i| (*addr_of!((*s).slots[*i])).cache.is_none())
			.count()
	}

	#[test]
	fn slab_accounting() {
		let slab = new_slab().unwrap();
		unsafe {
			assert_eq!((*slab.as_ptr()).header.free_count, SLAB_ENTRY_COUNT);
			assert_eq!(vacant_slots(slab), SLAB_ENTRY_COUNT);
			let a = slab_alloc(slab).unwrap();
			let b = slab_alloc(slab).unwrap();
			let c = slab_alloc(slab).unwrap();
			assert_eq!((*slab.as_ptr()).header.free_count, SLAB_ENTRY_COUNT - 3);
			assert_eq!(vacant_slots(slab), SLAB_ENTRY_COUNT - 3);
			free_mapping(b);
			assert_eq!((*slab.as_ptr()).header.free_count, SLAB_ENTRY_COUNT - 2);
			assert_eq!(vacant_slots(slab), SLAB_ENTRY_COUNT - 2);
			free_mapping(a);
			free_mapping(c);
			assert_eq!((*slab.as_ptr()).header.free_count, SLAB_ENTRY_COUNT);
		}
	}

	#[test]
	fn first_free_hint_reuse() {
		let slab = new_slab().unwrap();
		unsafe {
			let a = slab_alloc(slab).unwrap();
			let _b = slab_alloc(slab).unwrap();
			let a_addr = a.as_ptr() as usize;
			free_mapping(a);
			// The lowest vacant slot is handed out again
			let c = slab_alloc(slab).unwrap();
			assert_eq!(c.as_ptr() as usize, a_addr);
		}
	}

	#[test]
	fn chain_grows() {
		// Exhausting one slab worth of descriptors must not fail
		let mut held = alloc::vec::Vec::new();
		for _ in 0..SLAB_ENTRY_COUNT + 1 {
			held.push(alloc_mapping().unwrap());
		}
		for m in held {
			unsafe {
				free_mapping(m);
			}
		}
	}
}
