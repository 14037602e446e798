//! Display helpers for data that doesn't own a UTF-8 invariant.

use core::{fmt, str};

/// Displays a byte slice that is expected to be UTF-8 but is not guaranteed to be (e.g. a
/// filename read off disk), falling back to a lossy rendering instead of panicking.
pub struct DisplayableStr<'s>(pub &'s [u8]);

impl fmt::Display for DisplayableStr<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match str::from_utf8(self.0) {
			Ok(s) => write!(f, "{s}"),
			Err(_) => {
				for &b in self.0 {
					write!(f, "{}", b as char)?;
				}
				Ok(())
			}
		}
	}
}

impl fmt::Debug for DisplayableStr<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "\"{self}\"")
	}
}
