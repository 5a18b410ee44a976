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

//! Timer contract.
//!
//! The hardware timer (local APIC) is a collaborator. It registers a
//! [`TimerBackend`] at boot; the kernel arms per-CPU [`TimerRequest`]s
//! through it. When a request fires, the interrupt path invokes its
//! callback with the trap frame.

use crate::process::regs::Regs;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use spin::Once;

/// A pending timer request, owned by the CPU it is armed on.
pub struct TimerRequest {
	/// Function invoked from the timer interrupt when the request fires.
	pub callback: fn(&mut Regs),
	/// Requested delay in microseconds.
	pub delay_us: AtomicU64,
	/// Tells whether the request re-arms itself when firing.
	pub periodic: AtomicBool,
}

impl TimerRequest {
	/// Creates a request invoking `callback` when firing.
	pub const fn new(callback: fn(&mut Regs)) -> Self {
		Self {
			callback,
			delay_us: AtomicU64::new(0),
			periodic: AtomicBool::new(false),
		}
	}
}

/// Driver side of the timer contract.
pub trait TimerBackend: Send + Sync {
	/// Arms `req` to fire in `delay_us` microseconds, periodically if
	/// `periodic` is set.
	fn arm(&self, req: &TimerRequest, delay_us: u64, periodic: bool);
}

/// The registered backend.
static BACKEND: Once<&'static dyn TimerBackend> = Once::new();

/// Registers the timer backend. Must be called exactly once.
pub fn init(backend: &'static dyn TimerBackend) {
	BACKEND.call_once(|| backend);
}

/// Arms `req` to fire in `delay_us` microseconds.
///
/// Before the backend is registered, the request is recorded but never
/// fires; this lets the scheduler run its setup before the timer driver is
/// up.
pub fn arm(req: &TimerRequest, delay_us: u64, periodic: bool) {
	req.delay_us.store(delay_us, Ordering::Relaxed);
	req.periodic.store(periodic, Ordering::Relaxed);
	if let Some(backend) = BACKEND.get() {
		backend.arm(req, delay_us, periodic);
	}
}
