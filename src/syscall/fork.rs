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

//! The `fork` system call duplicates the calling process.
//!
//! The child shares the parent's open-file slots (descriptor tables are
//! cloned, slots are reference counted) and inherits a copy of the
//! parent's address-space layout; its pages are demand-paged on first
//! access. The child resumes from the caller's trap frame with a return
//! value of zero.

use super::SyscallRet;
use crate::{
	errno::EResult,
	memory::vmm,
	process::{
		regs::Regs,
		scheduler,
		scheduler::SCHEDULER,
		thread::{Priority, Thread},
		Process,
	},
};
use alloc::sync::Arc;

/// The size of the child's kernel stack, in pages.
const KSTACK_PAGES: usize = 10;

/// Builds the child thread, ready to be enqueued.
fn fork_impl(frame: &Regs) -> EResult<Arc<Thread>> {
	let parent_thread = scheduler::core_local()
		.thread()
		.expect("fork from outside a thread");
	let proc = Process::current();
	// Build the child thread and its process shell. Until the child is
	// enqueued and linked, dropping the handles tears everything down, so
	// failures below roll back cleanly
	let child_thread =
		scheduler::new_uthread(None, None, KSTACK_PAGES, None, false, Priority::User)?;
	let child_proc = child_thread
		.proc
		.clone()
		.expect("user thread without process");
	// Share the open files
	proc.fdtable.clone_into(&child_proc.fdtable)?;
	// Copy the address-space layout
	let parent_ctx = parent_thread
		.ctx
		.clone()
		.or_else(|| scheduler::core_local().context())
		.ok_or(errno!(ENOMEM))?;
	let child_ctx = child_thread
		.ctx
		.as_ref()
		.expect("user thread without context");
	vmm::fork(&parent_ctx, child_ctx)?;
	// The child joins the process tree and inherits credentials
	Process::link_child(&proc, &child_proc);
	*child_proc.creds.lock() = proc.creds.lock().clone();
	// Both directories are shared, each holding its own reference
	let root = proc.root.lock().clone();
	if let Some(root) = &root {
		root.acquire();
	}
	*child_proc.root.lock() = root;
	let cwd = proc.cwd.lock().clone();
	if let Some(cwd) = &cwd {
		cwd.acquire();
	}
	*child_proc.cwd.lock() = cwd;
	// The child resumes from the caller's frame, with fork returning 0
	{
		let mut regs = child_thread.regs.lock();
		**regs = frame.clone();
		regs.set_syscall_ret(0);
		regs.set_syscall_errno(0);
	}
	child_thread.fx.lock().save();
	Ok(child_thread)
}

fn do_fork(frame: &Regs) -> EResult<usize> {
	let child_thread = fork_impl(frame)?;
	let pid = child_thread
		.proc
		.as_ref()
		.expect("user thread without process")
		.pid;
	SCHEDULER.queue_thread(child_thread);
	Ok(pid as usize)
}

/// The `fork` system call. `frame` is the caller's trap frame.
pub fn fork(frame: &Regs) -> SyscallRet {
	do_fork(frame).into()
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{
		file::{O_RDONLY, S_IFREG},
		memory::{vmm::FAULT_WRITE, MmuFlags, VirtAddr},
		syscall::test::install_process,
	};

	#[test]
	fn fork_clones_files_directories_and_memory() {
		let (fs, proc) = install_process();
		fs.seed("file", S_IFREG | 0o644);
		let fd = crate::syscall::open(b"file\0".as_ptr(), O_RDONLY, 0);
		assert_eq!(fd.errno, 0);
		// Give the parent a mapping and a faulted-in page
		vmm::set_used(VirtAddr(0x4000), 2, MmuFlags::READ | MmuFlags::WRITE).unwrap();
		assert!(vmm::handle_fault(VirtAddr(0x4000), FAULT_WRITE, true));

		let mut frame = Regs::default();
		frame.rip = 0x1000;
		frame.rax = 57;
		let child_thread = fork_impl(&frame).unwrap();
		let child = child_thread.proc.clone().unwrap();
		assert_ne!(child.pid, proc.pid);
		assert!(proc
			.children()
			.iter()
			.any(|c| c.pid == child.pid));

		// Open files are shared slot-for-slot
		let parent_fd = proc.fdtable.access(fd.ret as usize).unwrap();
		let child_fd = child.fdtable.access(fd.ret as usize).unwrap();
		assert!(Arc::ptr_eq(&parent_fd, &child_fd));

		// Directories are shared and their references bumped
		let root = proc.root.lock().clone().unwrap();
		assert!(Arc::ptr_eq(&root, &child.root.lock().clone().unwrap()));
		// One reference each for root and cwd, in both processes
		assert_eq!(root.refcount(), 4);

		// Credentials are copied
		assert_eq!(child.creds.lock().umask, proc.creds.lock().umask);

		// The address-space layout was copied, without the page tables
		let child_ctx = child_thread.ctx.clone().unwrap();
		assert_eq!(child_ctx.vmem.lock().translate(VirtAddr(0x4000)), None);
		let kind = child_ctx
			.user
			.lock()
			.find(VirtAddr(0x4000))
			.map(|m| m.kind);
		assert_eq!(kind, Some(crate::memory::vmm::list::MappingKind::Anon));
	}

	#[test]
	fn child_frame_returns_zero() {
		let (_fs, _proc) = install_process();
		let mut frame = Regs::default();
		frame.rip = 0xabc;
		frame.rax = 99;
		frame.rdx = 7;
		frame.rbx = 0x1234;
		let child_thread = fork_impl(&frame).unwrap();
		let regs = child_thread.regs.lock();
		assert_eq!(regs.rip, 0xabc);
		assert_eq!(regs.rbx, 0x1234);
		// fork returns 0 with no error in the child
		assert_eq!(regs.rax, 0);
		assert_eq!(regs.rdx, 0);
	}

	#[test]
	fn fork_returns_child_pid() {
		let (_fs, proc) = install_process();
		let frame = Regs::default();
		let ret = fork(&frame);
		assert_eq!(ret.errno, 0);
		assert!(ret.ret > 0);
		assert!(proc.children().iter().any(|c| c.pid as isize == ret.ret));
	}
}
