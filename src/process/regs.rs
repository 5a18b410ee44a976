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

//! CPU register state.
//!
//! [`Regs`] is the register frame pushed by the interrupt entry code. A
//! context switch works by overwriting the trap frame with the saved frame
//! of the next thread and returning from the interrupt.

use crate::{errno::Errno, memory::VirtAddr};
use core::fmt;

/// Kernel code segment selector.
pub const KERNEL_CS: u64 = 0x08;
/// Kernel data segment selector.
pub const KERNEL_DS: u64 = 0x10;
/// Userspace code segment selector.
pub const USER_CS: u64 = 0x3b;
/// Userspace data segment selector.
pub const USER_DS: u64 = 0x43;

/// RFLAGS with the reserved bit and the interrupt flag set.
const RFLAGS_DEFAULT: u64 = 0x202;

/// A CPU register frame, as laid out by the interrupt entry code.
#[repr(C)]
#[derive(Clone, Debug, Default)]
pub struct Regs {
	pub r15: u64,
	pub r14: u64,
	pub r13: u64,
	pub r12: u64,
	pub r11: u64,
	pub r10: u64,
	pub r9: u64,
	pub r8: u64,
	pub rbp: u64,
	pub rdi: u64,
	pub rsi: u64,
	pub rdx: u64,
	pub rcx: u64,
	pub rbx: u64,
	pub rax: u64,

	pub rip: u64,
	pub cs: u64,
	pub rflags: u64,
	pub rsp: u64,
	pub ss: u64,
}

impl Regs {
	/// Initializes the frame to resume at `ip` on `stack_top`, in kernel
	/// mode, with interrupts enabled.
	pub fn setup_kernel(&mut self, ip: VirtAddr, stack_top: VirtAddr) {
		*self = Self::default();
		self.rip = ip.0 as u64;
		self.rsp = stack_top.0 as u64;
		self.cs = KERNEL_CS;
		self.ss = KERNEL_DS;
		self.rflags = RFLAGS_DEFAULT;
	}

	/// Initializes the frame to resume at `ip` on `stack_top`, in user mode,
	/// with interrupts enabled.
	pub fn setup_user(&mut self, ip: VirtAddr, stack_top: VirtAddr) {
		*self = Self::default();
		self.rip = ip.0 as u64;
		self.rsp = stack_top.0 as u64;
		self.cs = USER_CS;
		self.ss = USER_DS;
		self.rflags = RFLAGS_DEFAULT;
	}

	/// Tells whether the frame was taken while running userspace code.
	pub fn is_user(&self) -> bool {
		self.cs == USER_CS
	}

	/// Writes the syscall return value slot.
	pub fn set_syscall_ret(&mut self, ret: usize) {
		self.rax = ret as u64;
	}

	/// Writes the syscall errno slot.
	pub fn set_syscall_errno(&mut self, errno: Errno) {
		self.rdx = errno as u64;
	}
}

impl fmt::Display for Regs {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(
			f,
			"rip: {:016x} rsp: {:016x} rflags: {:016x}",
			self.rip, self.rsp, self.rflags
		)?;
		writeln!(f, "cs: {:04x} ss: {:04x}", self.cs, self.ss)?;
		writeln!(
			f,
			"rax: {:016x} rbx: {:016x} rcx: {:016x} rdx: {:016x}",
			self.rax, self.rbx, self.rcx, self.rdx
		)?;
		writeln!(
			f,
			"rsi: {:016x} rdi: {:016x} rbp: {:016x}",
			self.rsi, self.rdi, self.rbp
		)?;
		writeln!(
			f,
			"r8:  {:016x} r9:  {:016x} r10: {:016x} r11: {:016x}",
			self.r8, self.r9, self.r10, self.r11
		)?;
		write!(
			f,
			"r12: {:016x} r13: {:016x} r14: {:016x} r15: {:016x}",
			self.r12, self.r13, self.r14, self.r15
		)
	}
}

/// Saved FPU/SSE state, as written by `fxsave`.
#[repr(C, align(16))]
pub struct FxState([u8; 512]);

impl FxState {
	/// Creates a zeroed state buffer.
	pub const fn new() -> Self {
		Self([0; 512])
	}

	/// Saves the current CPU's FPU/SSE state into the buffer.
	pub fn save(&mut self) {
		#[cfg(all(target_arch = "x86_64", not(test)))]
		unsafe {
			core::arch::asm!("fxsave64 [{}]", in(reg) self.0.as_mut_ptr());
		}
	}

	/// Restores the buffer into the current CPU's FPU/SSE state.
	pub fn restore(&self) {
		#[cfg(all(target_arch = "x86_64", not(test)))]
		unsafe {
			core::arch::asm!("fxrstor64 [{}]", in(reg) self.0.as_ptr());
		}
	}
}

impl Default for FxState {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn kernel_frame() {
		let mut regs = Regs::default();
		regs.setup_kernel(VirtAddr(0xdead000), VirtAddr(0xbeef000));
		assert_eq!(regs.rip, 0xdead000);
		assert_eq!(regs.rsp, 0xbeef000);
		assert_eq!(regs.cs, KERNEL_CS);
		assert!(!regs.is_user());
		// Interrupts must be enabled when the thread first runs
		assert_ne!(regs.rflags & 0x200, 0);
	}

	#[test]
	fn syscall_slots() {
		let mut regs = Regs::default();
		regs.set_syscall_ret(42);
		regs.set_syscall_errno(0);
		assert_eq!(regs.rax, 42);
		assert_eq!(regs.rdx, 0);
	}
}
