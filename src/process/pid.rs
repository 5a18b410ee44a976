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

//! PID allocation.

use core::sync::atomic::{AtomicU32, Ordering};

/// Type representing a process ID.
pub type Pid = u32;

/// The PID of the init process.
pub const INIT_PID: Pid = 1;

/// The next PID to be handed out.
static NEXT: AtomicU32 = AtomicU32::new(INIT_PID);

/// Returns a fresh PID.
///
/// PIDs are not reused.
pub fn next() -> Pid {
	NEXT.fetch_add(1, Ordering::Relaxed)
}
