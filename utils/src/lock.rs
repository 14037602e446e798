//! Locking primitives.
//!
//! The kernel runs on a single logical CPU and never preempts itself while executing kernel
//! code (see the concurrency model in the design notes): the only thing that can interleave
//! with a critical section is an interrupt handler. [`IntMutex`] is therefore a lock that
//! disables interrupts for its duration rather than spinning or sleeping; it is the sole
//! synchronization primitive used for kernel-global state (the process table, the buddy
//! allocator zones, the buffer cache).
//!
//! [`Mutex`] is an alias for [`IntMutex`]: there is no separate "preemptible" mutex in this
//! kernel, since there is no kernel preemption to guard against.

use crate::interrupt;
use core::{
	cell::UnsafeCell,
	ops::{Deref, DerefMut},
	sync::atomic::{AtomicBool, Ordering},
};

/// A lock that brackets its critical section with `cli`/`sti`.
///
/// This is correct only because the kernel is single-CPU and non-preemptive: disabling
/// interrupts is sufficient to exclude every other actor (there is no other core, and no
/// timer tick can switch away mid-section). A second-level `locked` flag still guards against
/// accidental re-entrancy (e.g. an interrupt handler taking the same lock while the mutator
/// is mid-update and interrupts briefly re-enabled), since this lock never sleeps.
pub struct IntMutex<T: ?Sized> {
	locked: AtomicBool,
	data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever granted through `lock`, which enforces exclusion.
unsafe impl<T: ?Sized + Send> Sync for IntMutex<T> {}
unsafe impl<T: ?Sized + Send> Send for IntMutex<T> {}

impl<T> IntMutex<T> {
	/// Creates a new lock wrapping `data`.
	pub const fn new(data: T) -> Self {
		Self {
			locked: AtomicBool::new(false),
			data: UnsafeCell::new(data),
		}
	}
}

impl<T: ?Sized> IntMutex<T> {
	/// Disables interrupts and acquires the lock, returning a guard that restores the previous
	/// interrupt state and releases the lock on drop.
	pub fn lock(&self) -> IntMutexGuard<'_, T> {
		let prev_enabled = interrupt::is_enabled();
		interrupt::disable();
		// A kernel bug, not a contention path: with interrupts disabled and no second CPU,
		// this CAS can only fail if the lock is held by the very code path that is now
		// attempting to re-acquire it.
		if self.locked.swap(true, Ordering::Acquire) {
			panic!("IntMutex: recursive lock");
		}
		IntMutexGuard {
			lock: self,
			prev_enabled,
		}
	}
}

/// RAII guard for [`IntMutex`].
pub struct IntMutexGuard<'a, T: ?Sized> {
	lock: &'a IntMutex<T>,
	prev_enabled: bool,
}

impl<T: ?Sized> Deref for IntMutexGuard<'_, T> {
	type Target = T;

	fn deref(&self) -> &T {
		// SAFETY: the guard's existence proves exclusive access.
		unsafe { &*self.lock.data.get() }
	}
}

impl<T: ?Sized> DerefMut for IntMutexGuard<'_, T> {
	fn deref_mut(&mut self) -> &mut T {
		// SAFETY: the guard's existence proves exclusive access.
		unsafe { &mut *self.lock.data.get() }
	}
}

impl<T: ?Sized> Drop for IntMutexGuard<'_, T> {
	fn drop(&mut self) {
		self.lock.locked.store(false, Ordering::Release);
		if self.prev_enabled {
			interrupt::enable();
		}
	}
}

/// Alias kept for call sites that don't care whether the lock is interrupt-disabling; in this
/// kernel, every lock is.
pub type Mutex<T> = IntMutex<T>;

/// A cell that lazily runs its initializer exactly once.
///
/// Used for global singletons whose construction needs to happen after boot (the buffer cache
/// pool, the device table) but before first use, without requiring a `static mut`.
pub struct OnceInit<T> {
	initialized: AtomicBool,
	value: UnsafeCell<Option<T>>,
}

unsafe impl<T: Send> Sync for OnceInit<T> {}

impl<T> OnceInit<T> {
	/// Creates an uninitialized cell.
	pub const fn new() -> Self {
		Self {
			initialized: AtomicBool::new(false),
			value: UnsafeCell::new(None),
		}
	}

	/// Initializes the cell. Panics if called more than once.
	pub fn init(&self, value: T) {
		if self.initialized.swap(true, Ordering::AcqRel) {
			panic!("OnceInit: double initialization");
		}
		// SAFETY: exclusive until `initialized` was observed false above.
		unsafe {
			*self.value.get() = Some(value);
		}
	}

	/// Returns a reference to the value, panicking if [`Self::init`] was never called.
	pub fn get(&self) -> &T {
		if !self.initialized.load(Ordering::Acquire) {
			panic!("OnceInit: used before initialization");
		}
		// SAFETY: once initialized, the value is never mutated again.
		unsafe { (*self.value.get()).as_ref().unwrap() }
	}
}

impl<T> Default for OnceInit<T> {
	fn default() -> Self {
		Self::new()
	}
}
