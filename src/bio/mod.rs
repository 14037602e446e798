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

//! Buffered block I/O: a fixed-size cache of disk-sector buffers shared by every reader and
//! writer of a block device, the way the reference kernel's `bio` module works.
//!
//! Buffers live in one circular list at all times. A lookup walks it front-to-back for a
//! `(dev, block_number)` hit; a miss evicts the least-recently-claimed unreferenced buffer
//! (walking back-to-front from the list's tail), flushing it first if dirty. Every caller gets
//! back a refcounted [`BufferRef`]; the buffer returns to the evictable pool only once its last
//! reference is dropped.

use crate::{
	device::{BlockDevice, DevT},
	error::Errno,
};
use utils::{errno, lock::IntMutex};

/// Size, in bytes, of one cached block. Deliberately smaller than most filesystem block sizes
/// (ext2's minimum is 1024): a single ext2 block spans multiple BIO buffers.
pub const BLOCK_SIZE: usize = 512;

pub type BlockNumber = u64;

mod flag {
	pub const VALID: u8 = 1;
	pub const DIRTY: u8 = 2;
}

/// Number of buffers kept in the cache. Fixed at boot, like the reference kernel's
/// `NumberOfBuffers`; there is no dynamic growth.
const NUM_BUFFERS: usize = 50;

/// Sentinel index meaning "no buffer" / "the head of the circular list".
const NIL: u32 = u32::MAX;

struct Slot {
	dev: DevT,
	flags: u8,
	ref_count: u32,
	block_number: BlockNumber,
	io_block_number: BlockNumber,
	data: [u8; BLOCK_SIZE],
	prev: u32,
	next: u32,
}

impl Slot {
	const fn empty() -> Self {
		Self {
			dev: 0,
			flags: 0,
			ref_count: 0,
			block_number: 0,
			io_block_number: 0,
			data: [0; BLOCK_SIZE],
			prev: NIL,
			next: NIL,
		}
	}
}

const MAX_DEVICES: usize = 4;

struct RegisteredDevice {
	dev: DevT,
	device: &'static dyn BlockDevice,
	first_lba: u64,
}

struct Cache {
	slots: [Slot; NUM_BUFFERS],
	/// Head of the circular list; `head_next`/`head_prev` are the list's sentinel links (there
	/// is no slot for the head itself, matching the reference kernel's dummy `Buffer head`).
	head_next: u32,
	head_prev: u32,
	devices: [Option<RegisteredDevice>; MAX_DEVICES],
}

impl Cache {
	fn unlink(&mut self, index: u32) {
		let (prev, next) = (self.slots[index as usize].prev, self.slots[index as usize].next);
		self.link_prev_mut(prev, next);
		self.link_next_mut(next, prev);
	}

	fn link_prev_mut(&mut self, of: u32, value: u32) {
		if of == NIL {
			self.head_next = value;
		} else {
			self.slots[of as usize].next = value;
		}
	}

	fn link_next_mut(&mut self, of: u32, value: u32) {
		if of == NIL {
			self.head_prev = value;
		} else {
			self.slots[of as usize].prev = value;
		}
	}

	/// Inserts `index` right after the head, matching `ClaimBuffer`'s insertion point.
	fn claim(&mut self, index: u32) {
		let old_head_next = self.head_next;
		self.slots[index as usize].next = old_head_next;
		self.slots[index as usize].prev = NIL;
		self.link_next_mut(old_head_next, index);
		self.head_next = index;
	}

	fn commit(&mut self, index: u32) -> bool {
		let slot = &mut self.slots[index as usize];
		if slot.flags & flag::DIRTY == 0 {
			return false;
		}
		let Some(rdev) = self.devices.iter().flatten().find(|d| d.dev == slot.dev) else {
			return false;
		};
		// Errors here are not surfaced: `Sync` and eviction are best-effort, matching the
		// reference kernel (which has no recovery path for a failed flush either).
		let _ = rdev.device.write_sectors(slot.io_block_number, &slot.data);
		slot.flags &= !flag::DIRTY;
		true
	}
}

static CACHE: IntMutex<Cache> = IntMutex::new(Cache {
	slots: [const { Slot::empty() }; NUM_BUFFERS],
	head_next: NIL,
	head_prev: NIL,
	devices: [const { None }; MAX_DEVICES],
});

/// Wait channel passed to [`crate::process::sleep_on`] by callers blocked waiting for a free
/// buffer. Its address, not its contents, is the channel identity.
static BUFFER_WAIT_CHANNEL: u8 = 0;

fn wait_channel() -> usize {
	&BUFFER_WAIT_CHANNEL as *const u8 as usize
}

/// Initializes the buffer cache's circular free list. Must run once, before any device is
/// registered or any block is read.
pub fn init() {
	let mut cache = CACHE.lock();
	cache.head_next = NIL;
	cache.head_prev = NIL;
	for i in 0..NUM_BUFFERS as u32 {
		cache.claim(i);
	}
}

/// Registers `device` as the backing store for logical device number `dev`, offsetting every
/// block number addressed through `dev` by `first_lba` sectors.
///
/// `first_lba` lets a single physical disk host several logical devices (e.g. one per
/// partition) without the filesystem layer ever seeing raw disk offsets; resolving the right
/// `first_lba` for a partition is the GPT scanner's job (out of scope, see the crate root
/// docs) before it calls this.
pub fn register_device(dev: DevT, device: &'static dyn BlockDevice, first_lba: u64) {
	let mut cache = CACHE.lock();
	let slot = cache
		.devices
		.iter_mut()
		.find(|d| d.is_none())
		.expect("too many block devices registered with bio");
	*slot = Some(RegisteredDevice {
		dev,
		device,
		first_lba,
	});
}

/// Finds a cached buffer for `(dev, block_number)`, or claims and returns an unreferenced one
/// (flushing it first if dirty), sleeping until one is available if every buffer is currently
/// referenced.
fn bget(dev: DevT, block_number: BlockNumber) -> BufferRef {
	loop {
		{
			let mut cache = CACHE.lock();
			// Look for a hit.
			let mut cur = cache.head_next;
			while cur != NIL {
				if cache.slots[cur as usize].dev == dev
					&& cache.slots[cur as usize].block_number == block_number
				{
					cache.slots[cur as usize].ref_count += 1;
					return BufferRef { index: cur };
				}
				cur = cache.slots[cur as usize].next;
			}
			// Sacrifice the least-recently claimed unreferenced buffer, scanning from the tail.
			let mut cur = cache.head_prev;
			while cur != NIL {
				if cache.slots[cur as usize].ref_count == 0 {
					cache.commit(cur);
					let first_lba = cache
						.devices
						.iter()
						.flatten()
						.find(|d| d.dev == dev)
						.map(|d| d.first_lba)
						.unwrap_or(0);
					let slot = &mut cache.slots[cur as usize];
					slot.dev = dev;
					slot.block_number = block_number;
					slot.io_block_number = first_lba + block_number;
					slot.flags = 0;
					slot.ref_count = 1;
					return BufferRef { index: cur };
				}
				cur = cache.slots[cur as usize].prev;
			}
		}
		// Every buffer is referenced; wait for one to be released rather than panicking (see
		// the open-question resolution in the design notes).
		crate::process::sleep_on(wait_channel());
	}
}

/// Reads block `block_number` of device `dev` into the cache, performing the underlying I/O
/// only if it isn't already cached and valid.
pub fn read_block(dev: DevT, block_number: BlockNumber) -> Result<BufferRef, Errno> {
	let buf = bget(dev, block_number);
	let needs_io = {
		let cache = CACHE.lock();
		cache.slots[buf.index as usize].flags & flag::VALID == 0
	};
	if needs_io {
		let (device, io_block_number) = {
			let cache = CACHE.lock();
			let rdev = cache
				.devices
				.iter()
				.flatten()
				.find(|d| d.dev == dev)
				.ok_or(errno!(ENXIO))?;
			(rdev.device, cache.slots[buf.index as usize].io_block_number)
		};
		let mut tmp = [0u8; BLOCK_SIZE];
		device.read_sectors(io_block_number, &mut tmp)?;
		let mut cache = CACHE.lock();
		let slot = &mut cache.slots[buf.index as usize];
		slot.data = tmp;
		slot.flags |= flag::VALID;
	}
	Ok(buf)
}

/// Marks `buf` dirty so it is flushed to disk on eviction or the next [`sync`].
pub fn write_block(buf: &BufferRef) {
	let mut cache = CACHE.lock();
	cache.slots[buf.index as usize].flags |= flag::DIRTY;
}

/// Flushes every dirty buffer currently in the cache. Returns the number flushed.
pub fn sync() -> usize {
	let mut cache = CACHE.lock();
	let mut n = 0;
	let mut cur = cache.head_next;
	while cur != NIL {
		if cache.commit(cur) {
			n += 1;
		}
		cur = cache.slots[cur as usize].next;
	}
	n
}

/// A refcounted handle to one cached block.
pub struct BufferRef {
	index: u32,
}

impl BufferRef {
	pub fn data(&self) -> [u8; BLOCK_SIZE] {
		CACHE.lock().slots[self.index as usize].data
	}

	pub fn with_data<R>(&self, f: impl FnOnce(&[u8; BLOCK_SIZE]) -> R) -> R {
		f(&CACHE.lock().slots[self.index as usize].data)
	}

	pub fn with_data_mut<R>(&self, f: impl FnOnce(&mut [u8; BLOCK_SIZE]) -> R) -> R {
		f(&mut CACHE.lock().slots[self.index as usize].data)
	}
}

impl Clone for BufferRef {
	fn clone(&self) -> Self {
		CACHE.lock().slots[self.index as usize].ref_count += 1;
		Self { index: self.index }
	}
}

impl Drop for BufferRef {
	fn drop(&mut self) {
		let mut cache = CACHE.lock();
		let slot = &mut cache.slots[self.index as usize];
		slot.ref_count -= 1;
		if slot.ref_count == 0 {
			cache.unlink(self.index);
			cache.claim(self.index);
			crate::process::wakeup(wait_channel());
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	struct MemDisk {
		data: IntMutex<[[u8; BLOCK_SIZE]; 16]>,
	}

	impl BlockDevice for MemDisk {
		fn read_sectors(&self, lba: u64, buf: &mut [u8]) -> Result<(), Errno> {
			buf.copy_from_slice(&self.data.lock()[lba as usize]);
			Ok(())
		}

		fn write_sectors(&self, lba: u64, buf: &[u8]) -> Result<(), Errno> {
			self.data.lock()[lba as usize].copy_from_slice(buf);
			Ok(())
		}
	}

	static DISK: MemDisk = MemDisk {
		data: IntMutex::new([[0; BLOCK_SIZE]; 16]),
	};

	fn setup(dev: DevT) {
		init();
		register_device(dev, &DISK, 0);
	}

	#[test]
	fn read_then_read_again_hits_the_cache() {
		setup(1);
		let a = read_block(1, 0).unwrap();
		let b = read_block(1, 0).unwrap();
		assert_eq!(a.data(), b.data());
	}

	#[test]
	fn write_then_read_back_round_trips_through_sync() {
		setup(2);
		{
			let buf = read_block(2, 3).unwrap();
			buf.with_data_mut(|d| d[0] = 0xab);
			write_block(&buf);
		}
		assert!(sync() >= 1);
		let buf = read_block(2, 3).unwrap();
		assert_eq!(buf.with_data(|d| d[0]), 0xab);
	}

	#[test]
	fn release_returns_buffer_to_evictable_pool() {
		setup(3);
		for i in 0..NUM_BUFFERS as u64 {
			drop(read_block(3, i).unwrap());
		}
		// With every prior buffer released, one more distinct block must still succeed
		// without needing to sleep for a reference to free up.
		assert!(read_block(3, NUM_BUFFERS as u64).is_ok());
	}
}
