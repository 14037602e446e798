//! Interrupt flag bookkeeping.
//!
//! The real `cli`/`sti`/`pushf` instructions are CPU bring-up concerns that live outside this
//! crate; this module exposes the narrow interface the rest of the kernel needs (enable,
//! disable, query, and "execute with interrupts disabled") over whatever the platform provides.
//! On `x86_64` this is backed by `cli`/`sti`/`rflags`; the `not(target_arch)` fallback exists
//! only so this crate can be unit-tested on the host.

#[cfg(not(target_arch = "x86_64"))]
use core::sync::atomic::AtomicBool;

#[cfg(target_arch = "x86_64")]
mod arch {
	use core::arch::asm;

	pub fn is_enabled() -> bool {
		let flags: u64;
		unsafe { asm!("pushfq; pop {}", out(reg) flags) };
		flags & (1 << 9) != 0
	}

	pub fn enable() {
		unsafe { asm!("sti") };
	}

	pub fn disable() {
		unsafe { asm!("cli") };
	}
}

#[cfg(not(target_arch = "x86_64"))]
mod arch {
	use super::HOST_FLAG;
	use core::sync::atomic::Ordering;

	pub fn is_enabled() -> bool {
		HOST_FLAG.load(Ordering::SeqCst)
	}

	pub fn enable() {
		HOST_FLAG.store(true, Ordering::SeqCst);
	}

	pub fn disable() {
		HOST_FLAG.store(false, Ordering::SeqCst);
	}
}

#[cfg(not(target_arch = "x86_64"))]
static HOST_FLAG: AtomicBool = AtomicBool::new(true);

/// Returns whether interrupts are currently enabled.
pub fn is_enabled() -> bool {
	arch::is_enabled()
}

/// Enables interrupts.
pub fn enable() {
	arch::enable();
}

/// Disables interrupts.
pub fn disable() {
	arch::disable();
}

/// Disables interrupts, runs `f`, then restores the previous interrupt state.
pub fn with_disabled<R>(f: impl FnOnce() -> R) -> R {
	let prev = is_enabled();
	disable();
	let r = f();
	if prev {
		enable();
	}
	r
}
