//! System-wide size limits.

/// Size of a page, in bytes, on the target architecture.
pub const PAGE_SIZE: usize = 4096;

/// Maximum number of file descriptors a single process may hold open at once.
pub const OPEN_MAX: u32 = 256;

/// Maximum length, in bytes, of a single path component (matches ext2's `name_len` field width).
pub const NAME_MAX: usize = 255;

/// Maximum length, in bytes, of a full path.
pub const PATH_MAX: usize = 4096;

/// Maximum number of symbolic links followed while resolving a single path, after which
/// resolution fails with `ELOOP`.
pub const SYMLOOP_MAX: usize = 8;

/// Size of the fixed-size process table: the maximum number of processes that can exist at
/// once, including zombies awaiting reaping.
pub const NPROC: usize = 64;

/// Size of an anonymous pipe's ring buffer, in bytes.
pub const PIPE_SIZE: usize = 4096;
