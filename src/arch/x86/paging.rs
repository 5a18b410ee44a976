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

//! x86_64 paging primitives.
//!
//! Page tables are reached through the higher-half direct map. The kernel
//! half of the address space is shared: every new root table copies the
//! upper-half entries of the boot page table, so kernel mappings are visible
//! in every context.

use crate::{
	errno::EResult,
	memory::{phys, MmuFlags, PhysAddr, VirtAddr},
};
use spin::Once;
use x86_64::{
	registers::control::{Cr3, Cr3Flags},
	structures::paging::{
		mapper::MapToError, FrameAllocator, Mapper, OffsetPageTable, Page, PageTable,
		PageTableFlags, PhysFrame, Size4KiB, Translate,
	},
};

/// The root table the kernel booted with, used as the reference for the
/// kernel half of every context.
static KERNEL_ROOT: Once<PhysAddr> = Once::new();

/// Captures the boot page table as the kernel-half reference.
///
/// Must be called once, before the first [`Root::new`].
pub fn init() {
	let (frame, _) = Cr3::read();
	KERNEL_ROOT.call_once(|| PhysAddr(frame.start_address().as_u64() as usize));
}

/// Bridges the physical memory contract to the page-table walker, for
/// intermediate table allocation.
struct TableFrames;

unsafe impl FrameAllocator<Size4KiB> for TableFrames {
	fn allocate_frame(&mut self) -> Option<PhysFrame<Size4KiB>> {
		let addr = phys::alloc(1).ok()?;
		// Fresh tables must not carry stale entries
		unsafe {
			(phys::hhdm(addr).0 as *mut u8).write_bytes(0, crate::memory::PAGE_SIZE);
		}
		PhysFrame::from_start_address(x86_64::PhysAddr::new(addr.0 as u64)).ok()
	}
}

fn arch_flags(flags: MmuFlags) -> PageTableFlags {
	let mut out = PageTableFlags::PRESENT;
	if flags.contains(MmuFlags::WRITE) {
		out |= PageTableFlags::WRITABLE;
	}
	if flags.contains(MmuFlags::USER) {
		out |= PageTableFlags::USER_ACCESSIBLE;
	}
	if !flags.contains(MmuFlags::EXEC) {
		out |= PageTableFlags::NO_EXECUTE;
	}
	out
}

/// A root page table.
pub struct Root(PhysAddr);

impl Root {
	/// Allocates a root table whose kernel half mirrors the boot page table.
	pub fn new() -> EResult<Self> {
		let addr = phys::alloc(1)?;
		let table = unsafe { &mut *(phys::hhdm(addr).0 as *mut PageTable) };
		table.zero();
		if let Some(kernel_root) = KERNEL_ROOT.get() {
			let kernel = unsafe { &*(phys::hhdm(*kernel_root).0 as *const PageTable) };
			for i in 256..512 {
				table[i].set_addr(kernel[i].addr(), kernel[i].flags());
			}
		}
		Ok(Self(addr))
	}

	fn mapper(&self) -> OffsetPageTable<'_> {
		let table = phys::hhdm(self.0).0 as *mut PageTable;
		let base = phys::hhdm(PhysAddr(0)).0 as u64;
		unsafe { OffsetPageTable::new(&mut *table, x86_64::VirtAddr::new(base)) }
	}

	/// Maps the page at `vaddr` to the frame at `paddr` with the given
	/// permissions, replacing any previous mapping.
	pub fn map(&mut self, paddr: PhysAddr, vaddr: VirtAddr, flags: MmuFlags) -> EResult<()> {
		let mut mapper = self.mapper();
		let page = Page::<Size4KiB>::containing_address(x86_64::VirtAddr::new(vaddr.0 as u64));
		let frame = PhysFrame::containing_address(x86_64::PhysAddr::new(paddr.0 as u64));
		let arch_flags = arch_flags(flags);
		// Intermediate tables are permissive; the leaf entry enforces the
		// actual permissions
		let parent_flags =
			PageTableFlags::PRESENT | PageTableFlags::WRITABLE | PageTableFlags::USER_ACCESSIBLE;
		let res = unsafe {
			mapper.map_to_with_table_flags(page, frame, arch_flags, parent_flags, &mut TableFrames)
		};
		match res {
			Ok(flush) => {
				flush.flush();
				Ok(())
			}
			Err(MapToError::PageAlreadyMapped(_)) => {
				if let Ok((_, flush)) = mapper.unmap(page) {
					flush.flush();
				}
				let flush = unsafe {
					mapper.map_to_with_table_flags(
						page,
						frame,
						arch_flags,
						parent_flags,
						&mut TableFrames,
					)
				}
				.map_err(|_| errno!(ENOMEM))?;
				flush.flush();
				Ok(())
			}
			Err(_) => Err(errno!(ENOMEM)),
		}
	}

	/// Unmaps the page at `vaddr`. Does nothing if the page is not mapped.
	pub fn unmap(&mut self, vaddr: VirtAddr) {
		let page = Page::<Size4KiB>::containing_address(x86_64::VirtAddr::new(vaddr.0 as u64));
		if let Ok((_, flush)) = self.mapper().unmap(page) {
			flush.flush();
		}
	}

	/// Translates `vaddr` to the physical address it is mapped to.
	pub fn translate(&self, vaddr: VirtAddr) -> Option<PhysAddr> {
		let addr = self
			.mapper()
			.translate_addr(x86_64::VirtAddr::new(vaddr.0 as u64))?;
		Some(PhysAddr(addr.as_u64() as usize))
	}

	/// Loads this root table on the current CPU.
	pub fn bind(&self) {
		let frame = PhysFrame::containing_address(x86_64::PhysAddr::new(self.0 .0 as u64));
		unsafe {
			Cr3::write(frame, Cr3Flags::empty());
		}
	}
}

impl Drop for Root {
	fn drop(&mut self) {
		// The kernel-half tables are shared and must survive; only the root
		// frame itself is returned
		phys::free(self.0, 1);
	}
}
