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

//! Character and block device registries.
//!
//! Devices are looked up by a POSIX `dev_t`-shaped `(major, minor)` pair, the way `device.cpp`
//! in the reference kernel does it, except the lookup table here is a fixed-size array behind
//! a lock instead of a hardcoded `switch` on the major number, so ext2's root device and the
//! pipe/console/null character devices are all registered through the same call.

pub mod console;
pub mod ide;
pub mod null;
pub mod serial;

use crate::error::Errno;
use utils::lock::IntMutex;

/// POSIX-style device number: major in the high byte, minor in the low byte, matching
/// `DOGFOOD_DEV_MAJOR_SHIFT`/`DOGFOOD_DEV_MINOR_SHIFT` in `dogfood/device.h`.
pub type DevT = u16;

/// Builds a device number from its major and minor components.
pub const fn makedev(major: u8, minor: u8) -> DevT {
	((major as DevT) << 8) | minor as DevT
}

/// Major number of the null device (`/dev/null`).
pub const MAJOR_NULL: u8 = 1;
/// Major number of the serial console device (`/dev/console`).
pub const MAJOR_CONSOLE: u8 = 2;
/// Major number of the primary IDE disk, addressed by ext2 for block I/O.
pub const MAJOR_IDE: u8 = 3;

/// A device that can be read from and written to a byte at a time, with non-blocking
/// readiness queries for `select`/`poll`.
pub trait CharacterDevice: Sync {
	fn write(&self, buf: &[u8]) -> Result<usize, Errno>;
	fn read(&self, buf: &mut [u8]) -> Result<usize, Errno>;
	fn can_read(&self) -> bool;
	fn can_write(&self) -> bool;
}

/// A device addressed in fixed-size sectors, the way [`crate::bio`] addresses its backing
/// store.
pub trait BlockDevice: Sync {
	/// Reads `buf.len()` bytes (a multiple of the sector size) starting at sector `lba`.
	fn read_sectors(&self, lba: u64, buf: &mut [u8]) -> Result<(), Errno>;
	/// Writes `buf.len()` bytes (a multiple of the sector size) starting at sector `lba`.
	fn write_sectors(&self, lba: u64, buf: &[u8]) -> Result<(), Errno>;
}

const MAX_CHAR_DEVICES: usize = 8;
const MAX_BLOCK_DEVICES: usize = 4;

struct Registry {
	char_devices: [Option<(DevT, &'static dyn CharacterDevice)>; MAX_CHAR_DEVICES],
	block_devices: [Option<(DevT, &'static dyn BlockDevice)>; MAX_BLOCK_DEVICES],
}

static REGISTRY: IntMutex<Registry> = IntMutex::new(Registry {
	char_devices: [const { None }; MAX_CHAR_DEVICES],
	block_devices: [const { None }; MAX_BLOCK_DEVICES],
});

/// Registers a character device under `dev`, replacing any previous registration at the same
/// number.
pub fn register_character_device(dev: DevT, device: &'static dyn CharacterDevice) {
	let mut reg = REGISTRY.lock();
	if let Some(slot) = reg
		.char_devices
		.iter_mut()
		.find(|s| s.map(|(d, _)| d) == Some(dev))
	{
		*slot = Some((dev, device));
		return;
	}
	let slot = reg
		.char_devices
		.iter_mut()
		.find(|s| s.is_none())
		.expect("too many character devices registered");
	*slot = Some((dev, device));
}

/// Registers a block device under `dev`.
pub fn register_block_device(dev: DevT, device: &'static dyn BlockDevice) {
	let mut reg = REGISTRY.lock();
	let slot = reg
		.block_devices
		.iter_mut()
		.find(|s| s.is_none())
		.expect("too many block devices registered");
	*slot = Some((dev, device));
}

/// Looks up a character device by its `(major, minor)` number.
pub fn lookup_character_device(dev: DevT) -> Option<&'static dyn CharacterDevice> {
	let reg = REGISTRY.lock();
	reg.char_devices
		.iter()
		.flatten()
		.find(|(d, _)| *d == dev)
		.map(|(_, device)| *device)
}

/// Looks up a block device by its `(major, minor)` number.
pub fn lookup_block_device(dev: DevT) -> Option<&'static dyn BlockDevice> {
	let reg = REGISTRY.lock();
	reg.block_devices
		.iter()
		.flatten()
		.find(|(d, _)| *d == dev)
		.map(|(_, device)| *device)
}

/// The console character device, used as the default stdin/stdout/stderr for the first
/// process and as the serial sink behind `print!`/`println!`.
pub fn console() -> &'static dyn CharacterDevice {
	static CONSOLE: console::Console = console::Console;
	lookup_character_device(makedev(MAJOR_CONSOLE, 0)).unwrap_or(&CONSOLE)
}

/// Registers the built-in null, console and IDE devices.
///
/// Called once during boot, after the buddy allocator is up and before the filesystem is
/// mounted (mounting the root filesystem needs [`MAJOR_IDE`] registered).
pub fn init() {
	static NULL: null::Null = null::Null;
	static CONSOLE: console::Console = console::Console;
	static IDE0: ide::Ide = ide::Ide::new(0);
	register_character_device(makedev(MAJOR_NULL, 0), &NULL);
	register_character_device(makedev(MAJOR_CONSOLE, 0), &CONSOLE);
	register_block_device(makedev(MAJOR_IDE, 0), &IDE0);
}
