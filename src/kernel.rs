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

//! Lumen is a Unix-like kernel written in Rust. This crate is the kernel
//! core: memory management, scheduling, the virtual filesystem and the
//! system call surface on top of them.
//!
//! The boot shim, interrupt stubs and device drivers live outside of this
//! crate and reach it through the contracts in [`memory::phys`], [`time`]
//! and [`logger`].
//!
//! Unit tests build the crate hosted, with a `std` backend standing in for
//! physical memory and every test thread acting as its own CPU.

#![cfg_attr(not(test), no_std)]
#![allow(dead_code)]

extern crate alloc;

#[macro_use]
pub mod errno;
#[macro_use]
pub mod print;

pub mod arch;
pub mod cmdline;
pub mod file;
pub mod limits;
pub mod logger;
pub mod memory;
pub mod panic;
pub mod process;
pub mod sync;
pub mod syscall;
pub mod time;

use crate::errno::EResult;

/// The kernel's name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
/// Current kernel version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initializes the kernel core.
///
/// The boot shim calls this once on the bootstrap CPU, after the CPU is in
/// long mode with the boot page tables loaded.
///
/// Arguments:
/// - `phys`: the physical memory allocator and higher-half direct map.
/// - `console`: the sink kernel logs are forwarded to.
/// - `timer`: the hardware timer the scheduler arms its quantum on.
/// - `boot_cmdline`: the bootloader-provided command line.
/// - `regions`: the boot memory map and kernel sections, reserved in the
///   kernel half before paging becomes user-visible.
pub fn init(
	phys: &'static dyn memory::phys::PhysicalAllocator,
	console: &'static dyn logger::Console,
	timer: &'static dyn time::TimerBackend,
	boot_cmdline: &[u8],
	regions: &[memory::vmm::BootRegion],
) -> EResult<()> {
	logger::init(console);
	println!("Booting {NAME} version {VERSION}");

	let args = match cmdline::ArgsParser::parse(boot_cmdline) {
		Ok(args) => args,
		Err(err) => {
			println!("{err}");
			return Err(errno!(EINVAL));
		}
	};
	logger::LOGGER.lock().silent = args.is_silent();

	println!("Setup memory management");
	memory::phys::init(phys);
	memory::heap::init()?;
	memory::vmem::init();
	memory::vmm::init(regions)?;

	println!("Setup time management");
	time::init(timer);

	println!("Setup files management");
	file::init()?;

	println!("Setup processes");
	process::scheduler::init()?;

	if let Some(path) = args.get_init_path() {
		if let Ok(path) = core::str::from_utf8(path) {
			println!("init program: {path}");
		}
	}
	Ok(())
}
