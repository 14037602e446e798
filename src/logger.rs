/*
 * This file is part of Dogfood.
 *
 * Dogfood is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Dogfood is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Dogfood. If not, see <https://www.gnu.org/licenses/>.
 */

//! The kernel's single global log writer.
//!
//! Every `print!`/`println!` call and every panic message go through [`LOGGER`]. There is no
//! filtering or buffering: each write is forwarded immediately to the serial console
//! collaborator (§1 names the serial driver as an external byte in/out interface).

use crate::device::serial;
use core::fmt;
use utils::lock::IntMutex;

/// The kernel's global logger.
pub static LOGGER: IntMutex<Logger> = IntMutex::new(Logger);

/// Writes formatted text out over the serial console, one byte at a time.
pub struct Logger;

impl fmt::Write for Logger {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		for b in s.bytes() {
			serial::write_byte(b);
		}
		Ok(())
	}
}

/// Performs one-time logger setup. Currently a no-op placeholder kept for symmetry with the
/// rest of the boot sequence's `init` functions; the serial console itself is initialized by
/// its own collaborator before the kernel runs any Rust code.
pub fn init() {}
