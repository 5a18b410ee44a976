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

//! The virtual memory manager.
//!
//! Each address-space half is described by a mapping list (see [`list`]).
//! The kernel half is process-wide state shared by every context; the user
//! half belongs to the current context, reached through CPU-local storage.
//!
//! The MMU is only ever programmed on demand: creating an anonymous mapping
//! just records it in the list, and the page-fault handler installs pages on
//! first access.

mod cache;
pub mod list;

use crate::{
	errno::EResult,
	memory::{
		phys,
		vmem::VMem,
		MmuFlags, PhysAddr, VirtAddr, KERNEL_SPACE_END, KERNEL_SPACE_START, PAGE_SIZE,
		USER_SPACE_END, USER_SPACE_START,
	},
	process::scheduler,
	sync::IntMutex,
};
use alloc::sync::Arc;
use list::{MappingKind, MappingList};

/// Page fault error flag: the fault was not caused by a missing page.
pub const FAULT_PRESENT: u32 = 0b00001;
/// Page fault error flag: the fault was caused by a write access.
pub const FAULT_WRITE: u32 = 0b00010;
/// Page fault error flag: the fault happened in userspace.
pub const FAULT_USER: u32 = 0b00100;
/// Page fault error flag: the fault was caused by an instruction fetch.
pub const FAULT_INSTRUCTION: u32 = 0b10000;

/// The kernel-half mapping list, shared by every context.
static KERNEL_LIST: IntMutex<MappingList> = IntMutex::new(MappingList::empty());

/// A process' address-space context.
pub struct VmmContext {
	/// The user-half mapping list.
	pub(crate) user: IntMutex<MappingList>,
	/// The architecture-specific memory context.
	pub(crate) vmem: IntMutex<VMem>,
}

impl VmmContext {
	/// Creates a context whose user half is a single free mapping covering
	/// the whole half.
	pub fn new() -> EResult<Arc<Self>> {
		Ok(Arc::new(Self {
			user: IntMutex::new(MappingList::new(USER_SPACE_START, USER_SPACE_END)?),
			vmem: IntMutex::new(VMem::new()?),
		}))
	}

	/// Loads the context on the current CPU.
	pub fn bind(self: &Arc<Self>) {
		self.vmem.lock().bind();
		scheduler::core_local().set_context(Some(self.clone()));
	}
}

/// A memory region discovered at boot, to be reserved in the kernel half.
pub struct BootRegion {
	/// The first address of the region.
	pub addr: VirtAddr,
	/// The size of the region in pages.
	pub pages: usize,
	/// Permissions of the region.
	pub flags: MmuFlags,
}

/// Initializes the kernel-half mapping list and reserves the given
/// boot-discovered regions (direct-mapped physical memory, kernel sections).
pub fn init(regions: &[BootRegion]) -> EResult<()> {
	let mut kernel = KERNEL_LIST.lock();
	*kernel = MappingList::new(KERNEL_SPACE_START, KERNEL_SPACE_END)?;
	for region in regions {
		kernel.set(
			region.addr.align_down(PAGE_SIZE),
			region.pages,
			region.flags,
			MappingKind::Anon,
		)?;
	}
	drop(kernel);
	println!("{} mapping descriptors per cache slab", cache::SLAB_ENTRY_COUNT);
	Ok(())
}

/// Returns the current CPU's address-space context.
fn current_context() -> EResult<Arc<VmmContext>> {
	scheduler::core_local().context().ok_or(errno!(EFAULT))
}

/// Runs `f` on the mapping list responsible for `addr`: the process-wide
/// kernel list for kernel-half addresses, the current context's list
/// otherwise.
fn with_list<R>(addr: VirtAddr, f: impl FnOnce(&mut MappingList) -> EResult<R>) -> EResult<R> {
	if addr.is_kernelspace() {
		f(&mut KERNEL_LIST.lock())
	} else {
		let ctx = current_context()?;
		let mut list = ctx.user.lock();
		f(&mut list)
	}
}

/// Allocates `pages` pages of kernel virtual memory with the given
/// permissions, first fit.
///
/// The backing physical pages are demand-paged.
pub fn alloc(pages: usize, flags: MmuFlags) -> EResult<VirtAddr> {
	let mut kernel = KERNEL_LIST.lock();
	let addr = kernel.first_free(pages).ok_or(errno!(ENOMEM))?;
	kernel.set(addr, pages, flags, MappingKind::Anon)?;
	Ok(addr)
}

/// Allocates `pages` pages in the current context's user half, first fit.
pub fn alloc_user(pages: usize, flags: MmuFlags) -> EResult<VirtAddr> {
	let ctx = current_context()?;
	let mut list = ctx.user.lock();
	let addr = list.first_free(pages).ok_or(errno!(ENOMEM))?;
	list.set(addr, pages, flags, MappingKind::Anon)?;
	Ok(addr)
}

/// Marks `[addr, addr + pages * PAGE_SIZE - 1]` as anonymous memory with the
/// given permissions, without touching the MMU.
///
/// Used to reserve regions whose backing already exists, such as
/// bootloader-provided memory.
pub fn set_used(addr: VirtAddr, pages: usize, flags: MmuFlags) -> EResult<()> {
	with_list(addr, |list| list.set(addr, pages, flags, MappingKind::Anon))
}

/// Marks `[addr, addr + pages * PAGE_SIZE - 1]` as a free hole, without
/// touching the MMU.
pub fn set_free(addr: VirtAddr, pages: usize) -> EResult<()> {
	with_list(addr, |list| {
		list.set(addr, pages, MmuFlags::empty(), MappingKind::Free)
	})
}

/// Maps `pages` pages of physical memory starting at `paddr` to `vaddr`,
/// recording the mapping and programming the MMU.
pub fn map(paddr: PhysAddr, vaddr: VirtAddr, pages: usize, flags: MmuFlags) -> EResult<()> {
	let ctx = current_context()?;
	if vaddr.is_kernelspace() {
		KERNEL_LIST
			.lock()
			.set(vaddr, pages, flags, MappingKind::Anon)?;
	} else {
		ctx.user.lock().set(vaddr, pages, flags, MappingKind::Anon)?;
	}
	let result = ctx.vmem.lock().map_range(paddr, vaddr, pages, flags);
	result
}

/// Unmaps `pages` pages starting at `vaddr`: physical pages of anonymous
/// mappings are freed, their PTEs dropped, and the range becomes a free
/// hole.
pub fn unmap(vaddr: VirtAddr, pages: usize) -> EResult<()> {
	let ctx = current_context()?;
	let release = |list: &mut MappingList, vmem: &mut VMem| -> EResult<()> {
		for page in 0..pages {
			let addr = vaddr + page * PAGE_SIZE;
			let Some(mapping) = list.find(addr) else {
				continue;
			};
			match mapping.kind {
				MappingKind::Anon => {
					if let Some(paddr) = vmem.translate(addr) {
						phys::free(paddr, 1);
						vmem.unmap(addr);
					}
				}
				MappingKind::File {
					..
				} => panic!("file-backed mappings are not implemented"),
				MappingKind::Free => {}
			}
		}
		list.set(vaddr, pages, MmuFlags::empty(), MappingKind::Free)
	};
	if vaddr.is_kernelspace() {
		release(&mut KERNEL_LIST.lock(), &mut ctx.vmem.lock())
	} else {
		release(&mut ctx.user.lock(), &mut ctx.vmem.lock())
	}
}

/// Services a page fault at `addr`.
///
/// `error` carries the architecture's fault flags and `is_user` tells
/// whether the access came from userspace.
///
/// Returns `true` if the fault has been resolved and execution can resume.
/// On `false` the caller decides between killing the process and a kernel
/// panic.
pub fn handle_fault(addr: VirtAddr, error: u32, is_user: bool) -> bool {
	// Userspace has no business touching the kernel half
	if is_user && addr.is_kernelspace() {
		return false;
	}
	// The page is present: this is a protection violation, not a missing
	// page, and demand paging cannot resolve it
	if error & FAULT_PRESENT != 0 {
		return false;
	}
	let Ok(ctx) = current_context() else {
		return false;
	};
	let aligned = addr.align_down(PAGE_SIZE);
	let lookup = |list: &MappingList| list.find(aligned).map(|m| (m.kind, m.flags));
	let found = if addr.is_kernelspace() {
		lookup(&KERNEL_LIST.lock())
	} else {
		lookup(&ctx.user.lock())
	};
	let Some((kind, flags)) = found else {
		return false;
	};
	match kind {
		MappingKind::Free => false,
		MappingKind::File {
			..
		} => panic!("file-backed mappings are not implemented"),
		MappingKind::Anon => {
			if error & FAULT_WRITE != 0 && !flags.contains(MmuFlags::WRITE) {
				return false;
			}
			if error & FAULT_INSTRUCTION != 0 && !flags.contains(MmuFlags::EXEC) {
				return false;
			}
			let Ok(frame) = phys::alloc(1) else {
				return false;
			};
			// Never leak another process' data through a fresh page
			unsafe {
				(phys::hhdm(frame).0 as *mut u8).write_bytes(0, PAGE_SIZE);
			}
			let mut vmem = ctx.vmem.lock();
			if vmem.map(frame, aligned, flags).is_err() {
				phys::free(frame, 1);
				return false;
			}
			true
		}
	}
}

/// Clones `src`'s user half into `dst` for process forking.
///
/// The destination inherits the mapping list but no page tables: every page
/// is demand-paged anew on first access in the child.
pub fn fork(src: &VmmContext, dst: &VmmContext) -> EResult<()> {
	let src_list = src.user.lock();
	let mut new_list = MappingList::new(USER_SPACE_START, USER_SPACE_END)?;
	for mapping in src_list.iter() {
		if mapping.kind == MappingKind::Free {
			continue;
		}
		new_list.set(mapping.start, mapping.pages(), mapping.flags, mapping.kind)?;
	}
	*dst.user.lock() = new_list;
	Ok(())
}

/// Dumps the kernel-half mappings to the kernel logs.
pub fn dump() {
	let kernel = KERNEL_LIST.lock();
	println!("Kernel mappings:");
	for mapping in kernel.iter() {
		println!("{mapping:?}");
	}
}

#[cfg(test)]
mod test {
	use super::*;

	const RW: MmuFlags = MmuFlags::READ.union(MmuFlags::WRITE);

	/// Installs a fresh context as the current CPU's and returns it.
	fn fresh_context() -> Arc<VmmContext> {
		let ctx = VmmContext::new().unwrap();
		scheduler::core_local().set_context(Some(ctx.clone()));
		ctx
	}

	fn user_shape(ctx: &VmmContext) -> alloc::vec::Vec<(usize, usize, MappingKind)> {
		ctx.user
			.lock()
			.iter()
			.map(|m| (m.start.0, m.end.0, m.kind))
			.collect()
	}

	#[test]
	fn fresh_user_alloc_starts_at_zero() {
		let _ctx = fresh_context();
		assert_eq!(alloc_user(4, RW).unwrap(), VirtAddr(0));
	}

	#[test]
	fn set_used_splits_fresh_context() {
		let ctx = fresh_context();
		set_used(VirtAddr(0x1000), 1, RW).unwrap();
		assert_eq!(
			user_shape(&ctx),
			alloc::vec![
				(0, 0xfff, MappingKind::Free),
				(0x1000, 0x1fff, MappingKind::Anon),
				(0x2000, USER_SPACE_END.0, MappingKind::Free),
			]
		);
	}

	#[test]
	fn consecutive_set_used_coalesce() {
		let ctx = fresh_context();
		set_used(VirtAddr(0x1000), 1, RW).unwrap();
		set_used(VirtAddr(0x2000), 1, RW).unwrap();
		assert_eq!(
			user_shape(&ctx)[1],
			(0x1000, 0x2fff, MappingKind::Anon),
		);
	}

	#[test]
	fn set_used_set_free_roundtrip() {
		let ctx = fresh_context();
		set_used(VirtAddr(0x5000), 3, RW).unwrap();
		set_free(VirtAddr(0x5000), 3).unwrap();
		assert_eq!(user_shape(&ctx).len(), 1);
	}

	#[test]
	fn fault_demand_pages_anon() {
		let ctx = fresh_context();
		set_used(VirtAddr(0x1000), 1, RW).unwrap();
		assert!(handle_fault(VirtAddr(0x1234), FAULT_WRITE | FAULT_USER, true));
		let paddr = ctx.vmem.lock().translate(VirtAddr(0x1000)).unwrap();
		// The fresh page is zeroed
		let byte = unsafe { (phys::hhdm(paddr).0 as *const u8).read() };
		assert_eq!(byte, 0);
	}

	#[test]
	fn fault_on_hole_fails() {
		let _ctx = fresh_context();
		assert!(!handle_fault(VirtAddr(0x1000), FAULT_USER, true));
	}

	#[test]
	fn protection_fault_is_not_serviced() {
		let _ctx = fresh_context();
		set_used(VirtAddr(0x1000), 1, MmuFlags::READ | MmuFlags::USER).unwrap();
		// Present page: protection violation
		assert!(!handle_fault(
			VirtAddr(0x1000),
			FAULT_PRESENT | FAULT_WRITE | FAULT_USER,
			true
		));
		// Write to a read-only mapping
		assert!(!handle_fault(VirtAddr(0x1000), FAULT_WRITE | FAULT_USER, true));
		// Plain read is fine
		assert!(handle_fault(VirtAddr(0x1000), FAULT_USER, true));
	}

	#[test]
	fn user_fault_on_kernel_half_fails() {
		let _ctx = fresh_context();
		assert!(!handle_fault(KERNEL_SPACE_START, FAULT_USER, true));
	}

	#[test]
	fn alloc_unmap_roundtrip() {
		let ctx = fresh_context();
		let before = user_shape(&ctx);
		let addr = alloc_user(3, RW).unwrap();
		assert!(handle_fault(addr, FAULT_WRITE, true));
		unmap(addr, 3).unwrap();
		assert_eq!(ctx.vmem.lock().translate(addr), None);
		assert_eq!(user_shape(&ctx), before);
	}

	#[test]
	fn fork_copies_list_not_pages() {
		let parent = fresh_context();
		set_used(VirtAddr(0x1000), 2, RW).unwrap();
		assert!(handle_fault(VirtAddr(0x1000), FAULT_WRITE, true));
		let child = VmmContext::new().unwrap();
		fork(&parent, &child).unwrap();
		assert_eq!(user_shape(&parent), user_shape(&child));
		// No page tables were inherited
		assert_eq!(child.vmem.lock().translate(VirtAddr(0x1000)), None);
		// The child demand-pages its own copy
		scheduler::core_local().set_context(Some(child.clone()));
		assert!(handle_fault(VirtAddr(0x1000), FAULT_WRITE, true));
		assert!(child.vmem.lock().translate(VirtAddr(0x1000)).is_some());
	}

	#[test]
	fn kernel_half_bootstrap() {
		let _ctx = fresh_context();
		// This test is the only one touching the kernel-half list
		init(&[BootRegion {
			addr: KERNEL_SPACE_START,
			pages: 16,
			flags: RW,
		}])
		.unwrap();
		let addr = alloc(2, RW).unwrap();
		assert_eq!(addr, KERNEL_SPACE_START + 16 * PAGE_SIZE);
		set_free(addr, 2).unwrap();
	}
}
