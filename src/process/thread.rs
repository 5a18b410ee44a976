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

//! Kernel threads.
//!
//! A thread is the unit the scheduler dispatches. Its register frame lives
//! in its own allocation so the timer hook can swap it with the trap frame.

use crate::{
	errno::EResult,
	memory::{phys, vmm::VmmContext, VirtAddr, PAGE_SIZE},
	process::{
		pid::{self, Pid},
		regs::{FxState, Regs},
		Process,
	},
	sync::IntMutex,
};
use alloc::{boxed::Box, sync::Arc};
use core::{
	ptr::NonNull,
	sync::atomic::{AtomicU8, Ordering},
};

/// The number of scheduling priorities.
pub const PRIORITY_COUNT: usize = 3;

/// Scheduling priority of a thread. Lower values run first.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum Priority {
	/// Interrupt handling threads.
	Interrupt = 0,
	/// Kernel threads.
	Kernel = 1,
	/// Userspace threads.
	User = 2,
}

/// The state of a thread.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum State {
	/// The thread is currently executing on a CPU.
	Running = 0,
	/// The thread is ready to run, parked on its priority queue.
	Waiting = 1,
	/// The thread is parked until an event wakes it up.
	Blocked = 2,
	/// The thread has exited and awaits reaping.
	Zombie = 3,
}

impl State {
	fn from_u8(v: u8) -> Self {
		match v {
			0 => Self::Running,
			1 => Self::Waiting,
			2 => Self::Blocked,
			_ => Self::Zombie,
		}
	}
}

/// A thread's kernel stack, allocated from the higher-half direct map.
pub struct KernelStack {
	base: NonNull<u8>,
	pages: usize,
}

// The stack is owned by the thread and only written by the CPU running it
unsafe impl Send for KernelStack {}
unsafe impl Sync for KernelStack {}

impl KernelStack {
	/// Allocates a stack of `pages` pages.
	pub fn new(pages: usize) -> EResult<Self> {
		Ok(Self {
			base: phys::hhdm_alloc(pages)?,
			pages,
		})
	}

	/// Returns the address just past the stack, where execution starts.
	pub fn top(&self) -> VirtAddr {
		VirtAddr(self.base.as_ptr() as usize + self.pages * PAGE_SIZE)
	}
}

impl Drop for KernelStack {
	fn drop(&mut self) {
		phys::hhdm_free(self.base, self.pages);
	}
}

/// A schedulable thread.
pub struct Thread {
	/// The thread's ID.
	pub tid: Pid,
	/// The thread's scheduling priority.
	pub priority: Priority,
	/// The thread's state.
	state: AtomicU8,

	/// The saved register frame, swapped with the trap frame on context
	/// switch.
	pub regs: IntMutex<Box<Regs>>,
	/// The saved FPU/SSE state.
	pub fx: IntMutex<Box<FxState>>,
	/// The thread's kernel stack.
	pub kernel_stack: KernelStack,

	/// The process the thread belongs to. Pure kernel threads have none.
	pub proc: Option<Arc<Process>>,
	/// The thread's address-space context. Kernel threads run on whichever
	/// context is current.
	pub ctx: Option<Arc<VmmContext>>,
}

impl Thread {
	/// Allocates a thread with a fresh kernel stack.
	pub fn new(
		proc: Option<Arc<Process>>,
		ctx: Option<Arc<VmmContext>>,
		priority: Priority,
		stack_pages: usize,
	) -> EResult<Arc<Self>> {
		Ok(Arc::new(Self {
			tid: pid::next(),
			priority,
			state: AtomicU8::new(State::Waiting as u8),

			regs: IntMutex::new(Box::default()),
			fx: IntMutex::new(Box::default()),
			kernel_stack: KernelStack::new(stack_pages)?,

			proc,
			ctx,
		}))
	}

	/// Returns the thread's state.
	pub fn state(&self) -> State {
		State::from_u8(self.state.load(Ordering::Acquire))
	}

	/// Sets the thread's state.
	pub fn set_state(&self, state: State) {
		self.state.store(state as u8, Ordering::Release);
	}
}
