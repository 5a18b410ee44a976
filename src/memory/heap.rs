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

//! Kernel heap.
//!
//! The heap backs the global allocator and is fed with pages taken from the
//! higher-half direct map at initialization. Hosted test builds use the host
//! allocator instead.

use crate::{
	errno::EResult,
	memory::{phys, PAGE_SIZE},
};

/// The number of pages given to the kernel heap.
const HEAP_PAGES: usize = 4096;

#[cfg(not(test))]
#[global_allocator]
static ALLOCATOR: linked_list_allocator::LockedHeap = linked_list_allocator::LockedHeap::empty();

/// Initializes the kernel heap.
///
/// Must be called once, after the physical memory backend has been
/// registered and before the first allocation.
pub fn init() -> EResult<()> {
	let ptr = phys::hhdm_alloc(HEAP_PAGES)?;
	let size = HEAP_PAGES * PAGE_SIZE;
	#[cfg(not(test))]
	unsafe {
		ALLOCATOR.lock().init(ptr.as_ptr(), size);
	}
	#[cfg(test)]
	{
		// Hosted builds run on the host allocator
		let _ = size;
		phys::hhdm_free(ptr, HEAP_PAGES);
	}
	Ok(())
}
