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

//! Physical memory contract.
//!
//! The physical page allocator and the higher-half direct map (HHDM) are
//! owned by the boot shim. It registers its implementation once at boot;
//! everything in the kernel goes through the functions below.
//!
//! Hosted test builds register a `std`-backed implementation on first use,
//! with the HHDM being the identity.

use crate::{
	errno::EResult,
	memory::{PhysAddr, VirtAddr, PAGE_SIZE},
};
use core::ptr::NonNull;
use spin::Once;

/// Provider of physical pages and of the higher-half direct map.
pub trait PhysicalAllocator: Send + Sync {
	/// Allocates `pages` contiguous physical pages.
	fn alloc(&self, pages: usize) -> Option<PhysAddr>;
	/// Frees `pages` contiguous physical pages starting at `addr`.
	fn free(&self, addr: PhysAddr, pages: usize);
	/// Returns the virtual address at which physical memory is mapped.
	fn hhdm_base(&self) -> VirtAddr;
}

/// The registered backend.
static BACKEND: Once<&'static dyn PhysicalAllocator> = Once::new();

/// Registers the physical memory backend. Must be called exactly once, before
/// any allocation.
pub fn init(backend: &'static dyn PhysicalAllocator) {
	BACKEND.call_once(|| backend);
}

fn backend() -> &'static dyn PhysicalAllocator {
	#[cfg(test)]
	{
		*BACKEND.call_once(|| &test_backend::TEST_BACKEND)
	}
	#[cfg(not(test))]
	{
		*BACKEND.get().expect("physical memory backend not registered")
	}
}

/// Allocates `pages` contiguous physical pages.
pub fn alloc(pages: usize) -> EResult<PhysAddr> {
	backend().alloc(pages).ok_or(errno!(ENOMEM))
}

/// Frees `pages` contiguous physical pages starting at `addr`.
pub fn free(addr: PhysAddr, pages: usize) {
	backend().free(addr, pages);
}

/// Returns the virtual address of the given physical address through the
/// higher-half direct map.
pub fn hhdm(addr: PhysAddr) -> VirtAddr {
	backend().hhdm_base() + addr.0
}

/// Allocates `pages` contiguous physical pages and returns a pointer to them
/// through the higher-half direct map.
pub fn hhdm_alloc(pages: usize) -> EResult<NonNull<u8>> {
	let addr = alloc(pages)?;
	NonNull::new(hhdm(addr).0 as *mut u8).ok_or(errno!(ENOMEM))
}

/// Frees pages previously returned by [`hhdm_alloc`].
pub fn hhdm_free(ptr: NonNull<u8>, pages: usize) {
	let base = backend().hhdm_base();
	free(PhysAddr(ptr.as_ptr() as usize - base.0), pages);
}

#[cfg(test)]
mod test_backend {
	use super::*;
	use std::{alloc, sync::Mutex, vec::Vec};

	/// Host-backed physical memory, identity-mapped.
	pub(super) struct TestBackend {
		/// Base address and page count of each live allocation.
		allocs: Mutex<Vec<(usize, usize)>>,
	}

	pub(super) static TEST_BACKEND: TestBackend = TestBackend {
		allocs: Mutex::new(Vec::new()),
	};

	impl PhysicalAllocator for TestBackend {
		fn alloc(&self, pages: usize) -> Option<PhysAddr> {
			let layout = alloc::Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE).ok()?;
			let ptr = unsafe { alloc::alloc_zeroed(layout) };
			if ptr.is_null() {
				return None;
			}
			self.allocs.lock().unwrap().push((ptr as usize, pages));
			Some(PhysAddr(ptr as usize))
		}

		fn free(&self, addr: PhysAddr, pages: usize) {
			let mut allocs = self.allocs.lock().unwrap();
			let Some(i) = allocs.iter().position(|(base, _)| *base == addr.0) else {
				// Partial frees of a larger allocation are kept alive: the
				// host allocator cannot split them
				return;
			};
			if allocs[i].1 != pages {
				return;
			}
			allocs.remove(i);
			drop(allocs);
			let layout = alloc::Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE).unwrap();
			unsafe {
				alloc::dealloc(addr.0 as *mut u8, layout);
			}
		}

		fn hhdm_base(&self) -> VirtAddr {
			VirtAddr(0)
		}
	}
}
