//! Kernel error codes.
//!
//! The kernel never uses exceptions or panics for expected failure paths; every fallible
//! operation returns a `Result` whose error type is [`Errno`], mirroring the POSIX `errno`
//! values a syscall eventually reports back to userland.

use core::fmt;

/// A kernel error, named after the POSIX errno it corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
#[non_exhaustive]
pub enum Errno {
	EPERM = 1,
	ENOENT = 2,
	ESRCH = 3,
	EINTR = 4,
	EIO = 5,
	ENXIO = 6,
	E2BIG = 7,
	EBADF = 9,
	ECHILD = 10,
	EAGAIN = 11,
	ENOMEM = 12,
	EACCES = 13,
	EFAULT = 14,
	ENOTBLK = 15,
	EBUSY = 16,
	EEXIST = 17,
	EXDEV = 18,
	ENODEV = 19,
	ENOTDIR = 20,
	EISDIR = 21,
	EINVAL = 22,
	ENFILE = 23,
	EMFILE = 24,
	ENOTTY = 25,
	EFBIG = 27,
	ENOSPC = 28,
	ESPIPE = 29,
	EROFS = 30,
	EMLINK = 31,
	EPIPE = 32,
	ERANGE = 34,
	ENAMETOOLONG = 36,
	ENOSYS = 38,
	ENOTEMPTY = 39,
	ELOOP = 40,
	ENOTSOCK = 88,
	EOVERFLOW = 75,
}

impl Errno {
	/// The POSIX numeric value of this error.
	pub const fn as_i32(self) -> i32 {
		self as i32
	}
}

impl fmt::Display for Errno {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{self:?} ({})", self.as_i32())
	}
}

/// Builds an [`Errno`] from one of its variant names.
///
/// This indirection exists so call sites read like the syscalls they implement
/// (`return Err(errno!(ENOENT))`) instead of spelling out the enum path.
#[macro_export]
macro_rules! errno {
	($variant:ident) => {
		$crate::errno::Errno::$variant
	};
}

/// Result of a fallible kernel operation that reports a POSIX error on failure.
pub type EResult<T> = Result<T, Errno>;

/// Result of a fallible memory allocation.
///
/// Distinct from [`EResult`] because allocation is the one failure mode that can occur deep
/// inside code that has no `Errno` context to report (e.g. collection growth); it is converted
/// to `Errno::ENOMEM` at the nearest syscall boundary.
pub type AllocResult<T> = Result<T, AllocError>;

/// Marker error returned when a memory allocation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocError;

impl From<AllocError> for Errno {
	fn from(_: AllocError) -> Self {
		Errno::ENOMEM
	}
}

impl From<core::alloc::AllocError> for AllocError {
	fn from(_: core::alloc::AllocError) -> Self {
		AllocError
	}
}

impl From<core::alloc::LayoutError> for AllocError {
	fn from(_: core::alloc::LayoutError) -> Self {
		AllocError
	}
}
