//! Re-exports of the error types used throughout the kernel.
//!
//! Kept as a crate-local module (rather than having every file depend on `utils::errno`
//! directly) so the taxonomy in the design notes — resource exhaustion, lookup failure,
//! permission/usage, I/O, memory fault, bad state — has one obvious home to document against.

pub use utils::errno::{AllocError, AllocResult, EResult, Errno};
