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

//! Virtual memory context handler.
//!
//! [`VMem`] wraps the architecture's paging structures behind an
//! architecture-independent interface. The VMM treats it as a cache over its
//! own mapping bookkeeping: entries appear on demand paging and disappear on
//! unmap.
//!
//! On hosted builds the hardware walk is replaced by a software table so the
//! memory subsystem can be exercised as a regular process.

use crate::{
	errno::EResult,
	memory::{MmuFlags, PhysAddr, VirtAddr, PAGE_SIZE},
};

#[cfg(any(not(target_arch = "x86_64"), test))]
use alloc::collections::BTreeMap;

/// Initializes virtual memory management on the current CPU.
pub fn init() {
	#[cfg(all(target_arch = "x86_64", not(test)))]
	crate::arch::x86::paging::init();
}

/// An address-space's virtual memory context.
pub struct VMem {
	/// The root paging structure.
	#[cfg(all(target_arch = "x86_64", not(test)))]
	root: crate::arch::x86::paging::Root,
	/// Software page table, one entry per mapped page.
	#[cfg(any(not(target_arch = "x86_64"), test))]
	table: BTreeMap<VirtAddr, (PhysAddr, MmuFlags)>,
}

impl VMem {
	/// Creates a new virtual memory context.
	///
	/// The kernel half is inherited from the boot page table; the user half
	/// starts empty.
	pub fn new() -> EResult<Self> {
		Ok(Self {
			#[cfg(all(target_arch = "x86_64", not(test)))]
			root: crate::arch::x86::paging::Root::new()?,
			#[cfg(any(not(target_arch = "x86_64"), test))]
			table: BTreeMap::new(),
		})
	}

	/// Maps the page at `vaddr` to the physical page at `paddr`.
	pub fn map(&mut self, paddr: PhysAddr, vaddr: VirtAddr, flags: MmuFlags) -> EResult<()> {
		let vaddr = vaddr.align_down(PAGE_SIZE);
		#[cfg(all(target_arch = "x86_64", not(test)))]
		{
			self.root.map(paddr, vaddr, flags)
		}
		#[cfg(any(not(target_arch = "x86_64"), test))]
		{
			self.table.insert(vaddr, (paddr, flags));
			Ok(())
		}
	}

	/// Like [`Self::map`], on `pages` consecutive pages.
	pub fn map_range(
		&mut self,
		paddr: PhysAddr,
		vaddr: VirtAddr,
		pages: usize,
		flags: MmuFlags,
	) -> EResult<()> {
		for page in 0..pages {
			self.map(paddr + page * PAGE_SIZE, vaddr + page * PAGE_SIZE, flags)?;
		}
		Ok(())
	}

	/// Unmaps the page at `vaddr`. Does nothing if the page is not mapped.
	pub fn unmap(&mut self, vaddr: VirtAddr) {
		let vaddr = vaddr.align_down(PAGE_SIZE);
		#[cfg(all(target_arch = "x86_64", not(test)))]
		self.root.unmap(vaddr);
		#[cfg(any(not(target_arch = "x86_64"), test))]
		self.table.remove(&vaddr);
	}

	/// Like [`Self::unmap`], on `pages` consecutive pages.
	pub fn unmap_range(&mut self, vaddr: VirtAddr, pages: usize) {
		for page in 0..pages {
			self.unmap(vaddr + page * PAGE_SIZE);
		}
	}

	/// Translates `vaddr` to the physical address of the page it is mapped
	/// to, or `None` if the page is not mapped.
	pub fn translate(&self, vaddr: VirtAddr) -> Option<PhysAddr> {
		let vaddr = vaddr.align_down(PAGE_SIZE);
		#[cfg(all(target_arch = "x86_64", not(test)))]
		{
			self.root.translate(vaddr)
		}
		#[cfg(any(not(target_arch = "x86_64"), test))]
		{
			self.table.get(&vaddr).map(|(paddr, _)| *paddr)
		}
	}

	/// Loads this context on the current CPU.
	pub fn bind(&self) {
		#[cfg(all(target_arch = "x86_64", not(test)))]
		self.root.bind();
	}
}
