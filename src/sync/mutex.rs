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

//! Data-carrying spinlocks.
//!
//! [`Mutex`] is a plain spinlock. [`IntMutex`] additionally masks interrupts
//! for as long as the guard lives, which is required for any state that is
//! also touched from an interrupt handler (run queues, CPU-local storage,
//! address-space contexts accessed by the page-fault path).

use crate::arch::x86;
use core::{
	fmt,
	mem::ManuallyDrop,
	ops::{Deref, DerefMut},
};
use spin::mutex::{SpinMutex, SpinMutexGuard};

/// A spinning mutual exclusion primitive wrapping a value.
pub struct Mutex<T: ?Sized>(SpinMutex<T>);

/// Guard of a [`Mutex`]. The lock is released when the guard is dropped.
pub type MutexGuard<'m, T> = SpinMutexGuard<'m, T>;

impl<T> Mutex<T> {
	/// Creates a new instance wrapping the given `data`.
	pub const fn new(data: T) -> Self {
		Self(SpinMutex::new(data))
	}

	/// Consumes the mutex and returns the inner value.
	pub fn into_inner(self) -> T {
		self.0.into_inner()
	}
}

impl<T: ?Sized> Mutex<T> {
	/// Acquires the mutex, spinning until it becomes available.
	pub fn lock(&self) -> MutexGuard<'_, T> {
		self.0.lock()
	}
}

impl<T: Default> Default for Mutex<T> {
	fn default() -> Self {
		Self::new(Default::default())
	}
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Mutex<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(&*self.lock(), f)
	}
}

/// A spinning mutex masking interrupts on the current CPU while locked.
pub struct IntMutex<T: ?Sized>(SpinMutex<T>);

impl<T> IntMutex<T> {
	/// Creates a new instance wrapping the given `data`.
	pub const fn new(data: T) -> Self {
		Self(SpinMutex::new(data))
	}

	/// Consumes the mutex and returns the inner value.
	pub fn into_inner(self) -> T {
		self.0.into_inner()
	}
}

impl<T: ?Sized> IntMutex<T> {
	/// Acquires the mutex, spinning until it becomes available.
	///
	/// Interrupts are disabled on the current CPU and restored to their
	/// previous state when the guard is dropped.
	pub fn lock(&self) -> IntMutexGuard<'_, T> {
		let int_enabled = x86::int_enabled();
		x86::cli();
		IntMutexGuard {
			guard: ManuallyDrop::new(self.0.lock()),
			int_enabled,
		}
	}
}

impl<T: Default> Default for IntMutex<T> {
	fn default() -> Self {
		Self::new(Default::default())
	}
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for IntMutex<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(&*self.lock(), f)
	}
}

/// Guard of an [`IntMutex`].
pub struct IntMutexGuard<'m, T: ?Sized> {
	guard: ManuallyDrop<SpinMutexGuard<'m, T>>,
	/// Interrupt state to restore on drop.
	int_enabled: bool,
}

impl<T: ?Sized> Deref for IntMutexGuard<'_, T> {
	type Target = T;

	fn deref(&self) -> &Self::Target {
		&self.guard
	}
}

impl<T: ?Sized> DerefMut for IntMutexGuard<'_, T> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		&mut self.guard
	}
}

impl<T: ?Sized> Drop for IntMutexGuard<'_, T> {
	fn drop(&mut self) {
		// Release the lock before turning interrupts back on
		unsafe {
			ManuallyDrop::drop(&mut self.guard);
		}
		if self.int_enabled {
			x86::sti();
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn mutex_lock() {
		let m = Mutex::new(0usize);
		*m.lock() += 1;
		assert_eq!(*m.lock(), 1);
	}

	#[test]
	fn int_mutex_lock() {
		let m = IntMutex::new(41usize);
		{
			let mut guard = m.lock();
			*guard += 1;
		}
		assert_eq!(*m.lock(), 42);
	}
}
