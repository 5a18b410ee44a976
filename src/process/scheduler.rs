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

//! The thread scheduler.
//!
//! Threads are dispatched from three FIFO run queues, one per priority.
//! Priority is strict: a ready interrupt-priority thread always runs before
//! a kernel-priority one, which always runs before a user-priority one.
//! Within a priority, scheduling is round-robin.
//!
//! Preemption is driven by the quantum timer: the timer interrupt calls
//! [`Scheduler::timer_hook`], which swaps the trap frame with the saved
//! frame of the next thread. The context switch completes when the
//! interrupt returns.

use crate::{
	errno::EResult,
	memory::{vmm::VmmContext, VirtAddr},
	process::{
		regs::Regs,
		thread::{Priority, State, Thread, PRIORITY_COUNT},
		Process,
	},
	sync::IntMutex,
	time,
	time::TimerRequest,
};
use alloc::{collections::VecDeque, sync::Arc};
use core::sync::atomic::{AtomicU64, Ordering};

/// The scheduling quantum, in microseconds.
pub const THREAD_QUANTUM: u64 = 10_000;

/// The process-wide scheduler.
pub static SCHEDULER: Scheduler = Scheduler::new();

/// A FIFO queue of threads with its own lock.
struct Queue(IntMutex<VecDeque<Arc<Thread>>>);

impl Queue {
	const fn new() -> Self {
		Self(IntMutex::new(VecDeque::new()))
	}

	fn push_back(&self, thread: Arc<Thread>) {
		self.0.lock().push_back(thread);
	}

	fn pop_front(&self) -> Option<Arc<Thread>> {
		self.0.lock().pop_front()
	}

	/// Removes `thread` from the queue, by identity. Returns whether it was
	/// present.
	fn remove(&self, thread: &Arc<Thread>) -> bool {
		let mut queue = self.0.lock();
		let Some(i) = queue.iter().position(|t| Arc::ptr_eq(t, thread)) else {
			return false;
		};
		queue.remove(i);
		true
	}

	fn len(&self) -> usize {
		self.0.lock().len()
	}
}

/// The thread scheduler.
pub struct Scheduler {
	/// The run queues, indexed by priority.
	queues: [Queue; PRIORITY_COUNT],
	/// Threads currently executing on a CPU.
	running: Queue,
	/// Threads parked until an explicit wakeup.
	blocked: Queue,

	/// The total number of ticks since boot.
	total_ticks: AtomicU64,
}

impl Scheduler {
	/// Creates a scheduler with empty queues.
	pub const fn new() -> Self {
		Self {
			queues: [Queue::new(), Queue::new(), Queue::new()],
			running: Queue::new(),
			blocked: Queue::new(),

			total_ticks: AtomicU64::new(0),
		}
	}

	/// The total number of ticks since boot.
	pub fn get_total_ticks(&self) -> u64 {
		self.total_ticks.load(Ordering::Relaxed)
	}

	/// Inserts `thread` at the tail of its priority's queue, ready to run.
	pub fn queue_thread(&self, thread: Arc<Thread>) {
		thread.set_state(State::Waiting);
		self.queues[thread.priority as usize].push_back(thread);
	}

	/// Dequeues the next thread to run, scanning priorities in order, and
	/// moves it to the running queue.
	fn next_thread(&self) -> Option<Arc<Thread>> {
		for queue in &self.queues {
			if let Some(thread) = queue.pop_front() {
				self.running.push_back(thread.clone());
				return Some(thread);
			}
		}
		None
	}

	/// Preemption entry, called from the timer interrupt with `frame` being
	/// the interrupted context.
	///
	/// Saves `frame` into the outgoing thread, re-queues it at the tail of
	/// its priority (unless it parked itself), dequeues the
	/// highest-priority ready thread, installs its saved frame and rearms
	/// the quantum timer. If nothing is ready, the CPU keeps running what
	/// it had.
	pub fn timer_hook(&self, frame: &mut Regs) {
		self.total_ticks.fetch_add(1, Ordering::Relaxed);
		let cls = core_local();
		if let Some(current) = cls.thread() {
			**current.regs.lock() = frame.clone();
			if current.state() == State::Running {
				self.running.remove(&current);
				current.set_state(State::Waiting);
				self.queues[current.priority as usize].push_back(current);
			}
		}
		if let Some(next) = self.next_thread() {
			next.set_state(State::Running);
			*frame = (**next.regs.lock()).clone();
			if let Some(ctx) = &next.ctx {
				ctx.bind();
			}
			cls.set_thread(Some(next));
		}
		time::arm(&cls.timer_req, THREAD_QUANTUM, false);
	}

	/// Parks the current thread until [`Self::unblock`]. The thread keeps
	/// the CPU until the next tick.
	pub fn block_current(&self) {
		let Some(current) = core_local().thread() else {
			return;
		};
		self.running.remove(&current);
		current.set_state(State::Blocked);
		self.blocked.push_back(current);
	}

	/// Wakes `thread` up, making it ready to run again.
	pub fn unblock(&self, thread: &Arc<Thread>) {
		if self.blocked.remove(thread) {
			self.queue_thread(thread.clone());
		}
	}
}

/// Kernel core-local storage.
///
/// A CPU reaches its current thread, its address-space context and its
/// pending timer request through this structure; other CPUs never touch it.
pub struct CoreLocal {
	/// The thread currently running on this CPU.
	thread: IntMutex<Option<Arc<Thread>>>,
	/// The address-space context currently loaded on this CPU.
	context: IntMutex<Option<Arc<VmmContext>>>,
	/// The CPU's quantum timer request.
	pub timer_req: TimerRequest,
}

impl CoreLocal {
	const fn new() -> Self {
		Self {
			thread: IntMutex::new(None),
			context: IntMutex::new(None),
			timer_req: TimerRequest::new(tick),
		}
	}

	/// Returns the thread currently running on this CPU.
	pub fn thread(&self) -> Option<Arc<Thread>> {
		self.thread.lock().clone()
	}

	/// Records the thread currently running on this CPU.
	pub fn set_thread(&self, thread: Option<Arc<Thread>>) {
		*self.thread.lock() = thread;
	}

	/// Returns the address-space context loaded on this CPU.
	pub fn context(&self) -> Option<Arc<VmmContext>> {
		self.context.lock().clone()
	}

	/// Records the address-space context loaded on this CPU.
	pub fn set_context(&self, context: Option<Arc<VmmContext>>) {
		*self.context.lock() = context;
	}
}

/// Timer callback driving preemption.
fn tick(frame: &mut Regs) {
	SCHEDULER.timer_hook(frame);
}

#[cfg(not(test))]
static CORE_LOCAL: CoreLocal = CoreLocal::new();

/// Returns the core-local structure of the current CPU.
#[cfg(not(test))]
pub fn core_local() -> &'static CoreLocal {
	// TODO reach through the GS base once there is more than one core
	&CORE_LOCAL
}

/// Returns the core-local structure of the current CPU.
///
/// In hosted tests, every test thread gets its own CPU.
#[cfg(test)]
pub fn core_local() -> &'static CoreLocal {
	std::thread_local! {
		static CORE_LOCAL: &'static CoreLocal = alloc::boxed::Box::leak(alloc::boxed::Box::new(CoreLocal::new()));
	}
	CORE_LOCAL.with(|cls| *cls)
}

/// Creates a kernel thread entering at `entry` on a fresh kernel stack of
/// `stack_pages` pages, with interrupts enabled.
///
/// If `enqueue` is set, the thread is made ready to run immediately.
pub fn new_kthread(
	entry: VirtAddr,
	stack_pages: usize,
	enqueue: bool,
	priority: Priority,
) -> EResult<Arc<Thread>> {
	let thread = Thread::new(None, None, priority, stack_pages)?;
	{
		let mut regs = thread.regs.lock();
		let top = thread.kernel_stack.top();
		regs.setup_kernel(entry, top);
	}
	if enqueue {
		SCHEDULER.queue_thread(thread.clone());
	}
	Ok(thread)
}

/// Creates a userspace thread.
///
/// Arguments:
/// - `entry` and `user_stack` initialize the register frame when both are
///   given; fork overwrites the frame instead and passes `None`.
/// - `stack_pages` is the size of the kernel stack.
/// - `proc` is the owning process; a fresh process shell is created when
///   `None`.
/// - `enqueue` tells whether the thread is made ready to run immediately.
pub fn new_uthread(
	entry: Option<VirtAddr>,
	user_stack: Option<VirtAddr>,
	stack_pages: usize,
	proc: Option<Arc<Process>>,
	enqueue: bool,
	priority: Priority,
) -> EResult<Arc<Thread>> {
	let proc = proc.unwrap_or_else(Process::new);
	let ctx = VmmContext::new()?;
	let thread = Thread::new(Some(proc), Some(ctx), priority, stack_pages)?;
	if let (Some(entry), Some(user_stack)) = (entry, user_stack) {
		thread.regs.lock().setup_user(entry, user_stack);
	}
	if enqueue {
		SCHEDULER.queue_thread(thread.clone());
	}
	Ok(thread)
}

/// Initializes scheduling on the current CPU: the flow of control doing the
/// boot becomes the CPU's first thread.
pub fn init() -> EResult<()> {
	let thread = Thread::new(None, None, Priority::Kernel, 1)?;
	thread.set_state(State::Running);
	core_local().set_thread(Some(thread));
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;

	fn test_thread(priority: Priority, rip: u64) -> Arc<Thread> {
		let thread = Thread::new(None, None, priority, 1).unwrap();
		thread.regs.lock().rip = rip;
		thread
	}

	fn reset_cls() {
		core_local().set_thread(None);
		core_local().set_context(None);
	}

	#[test]
	fn kernel_priority_starves_user_until_blocked() {
		reset_cls();
		let sched = Scheduler::new();
		let k = test_thread(Priority::Kernel, 0x111);
		let u = test_thread(Priority::User, 0x222);
		sched.queue_thread(k.clone());
		sched.queue_thread(u.clone());

		let mut frame = Regs::default();
		// The kernel thread wins the first dispatch and every tick after
		for _ in 0..3 {
			sched.timer_hook(&mut frame);
			assert_eq!(frame.rip, 0x111);
			assert!(Arc::ptr_eq(&core_local().thread().unwrap(), &k));
		}
		// The quantum timer is rearmed on every tick
		assert_eq!(
			core_local()
				.timer_req
				.delay_us
				.load(core::sync::atomic::Ordering::Relaxed),
			THREAD_QUANTUM
		);
		// Once the kernel thread parks itself, the user thread runs
		sched.block_current();
		sched.timer_hook(&mut frame);
		assert_eq!(frame.rip, 0x222);
		assert!(Arc::ptr_eq(&core_local().thread().unwrap(), &u));
		assert_eq!(u.state(), State::Running);
		assert_eq!(k.state(), State::Blocked);
	}

	#[test]
	fn unblock_makes_thread_preempt_lower_priority() {
		reset_cls();
		let sched = Scheduler::new();
		let k = test_thread(Priority::Kernel, 0x111);
		let u = test_thread(Priority::User, 0x222);
		sched.queue_thread(k.clone());
		sched.queue_thread(u.clone());

		let mut frame = Regs::default();
		sched.timer_hook(&mut frame);
		sched.block_current();
		sched.timer_hook(&mut frame);
		assert_eq!(frame.rip, 0x222);

		sched.unblock(&k);
		assert_eq!(k.state(), State::Waiting);
		sched.timer_hook(&mut frame);
		assert_eq!(frame.rip, 0x111);
	}

	#[test]
	fn round_robin_within_priority() {
		reset_cls();
		let sched = Scheduler::new();
		let a = test_thread(Priority::Kernel, 0xaaa);
		let b = test_thread(Priority::Kernel, 0xbbb);
		sched.queue_thread(a.clone());
		sched.queue_thread(b.clone());

		let mut frame = Regs::default();
		sched.timer_hook(&mut frame);
		assert_eq!(frame.rip, 0xaaa);
		sched.timer_hook(&mut frame);
		assert_eq!(frame.rip, 0xbbb);
		sched.timer_hook(&mut frame);
		assert_eq!(frame.rip, 0xaaa);
	}

	#[test]
	fn outgoing_frame_is_saved() {
		reset_cls();
		let sched = Scheduler::new();
		let a = test_thread(Priority::Kernel, 0xaaa);
		let b = test_thread(Priority::Kernel, 0xbbb);
		sched.queue_thread(a.clone());
		sched.queue_thread(b.clone());

		let mut frame = Regs::default();
		sched.timer_hook(&mut frame);
		// The thread made progress before being preempted
		frame.rip = 0xaab;
		sched.timer_hook(&mut frame);
		assert_eq!(frame.rip, 0xbbb);
		assert_eq!(a.regs.lock().rip, 0xaab);
	}

	#[test]
	fn thread_is_in_one_queue_at_most() {
		reset_cls();
		let sched = Scheduler::new();
		let a = test_thread(Priority::Kernel, 0xaaa);
		sched.queue_thread(a.clone());

		let mut frame = Regs::default();
		sched.timer_hook(&mut frame);
		// `a` runs: it is in the running queue only
		assert_eq!(sched.running.len(), 1);
		assert_eq!(sched.queues[Priority::Kernel as usize].len(), 0);
		sched.block_current();
		assert_eq!(sched.running.len(), 0);
		assert_eq!(sched.blocked.len(), 1);
		sched.unblock(&a);
		assert_eq!(sched.blocked.len(), 0);
		assert_eq!(sched.queues[Priority::Kernel as usize].len(), 1);
	}

	#[test]
	fn empty_queues_keep_current_thread() {
		reset_cls();
		let sched = Scheduler::new();
		let a = test_thread(Priority::Kernel, 0xaaa);
		sched.queue_thread(a.clone());

		let mut frame = Regs::default();
		sched.timer_hook(&mut frame);
		sched.block_current();
		// Nothing else is runnable: the CPU keeps the blocked thread
		sched.timer_hook(&mut frame);
		assert!(Arc::ptr_eq(&core_local().thread().unwrap(), &a));
	}

	#[test]
	fn kthread_frame_points_at_entry() {
		reset_cls();
		let thread = new_kthread(VirtAddr(0x1234), 2, false, Priority::Kernel).unwrap();
		let regs = thread.regs.lock();
		assert_eq!(regs.rip, 0x1234);
		assert_eq!(regs.rsp, thread.kernel_stack.top().0 as u64);
		assert_ne!(regs.rflags & 0x200, 0);
	}
}
