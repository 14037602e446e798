//! Small integer math helpers used throughout the memory and filesystem code.

/// Returns `2^n`.
pub const fn pow2(n: usize) -> usize {
	1usize << n
}

/// Rounds `n` down to the previous multiple of `to` (`to` must be a power of two).
pub const fn round_down(n: usize, to: usize) -> usize {
	n & !(to - 1)
}

/// Rounds `n` up to the next multiple of `to` (`to` must be a power of two).
pub const fn round_up(n: usize, to: usize) -> usize {
	round_down(n + to - 1, to)
}

/// An exact rational number, used by the wall-clock/RTC calibration code to avoid floating
/// point in kernel space.
pub mod rational {
	/// A fraction `numerator / denominator`.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct Rational {
		numerator: i64,
		denominator: i64,
	}

	impl Rational {
		/// Creates a new rational. Panics if `denominator` is zero.
		pub const fn new(numerator: i64, denominator: i64) -> Self {
			assert!(denominator != 0);
			Self {
				numerator,
				denominator,
			}
		}

		/// Applies the ratio to `value`, rounding toward zero.
		pub const fn apply(&self, value: i64) -> i64 {
			(value * self.numerator) / self.denominator
		}
	}
}
