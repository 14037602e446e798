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

//! The kernel's global byte-granular allocator.
//!
//! Rust's collections (`Vec`, `BTreeMap`, `Box`, `Arc`) need a general-purpose heap, but the
//! buddy allocator in [`crate::memory::buddy`] only ever hands out whole pages. This module
//! bridges the two: it requests page-sized blocks from the buddy allocator on demand and carves
//! them into a simple first-fit free list of chunks, the way the reference kernel's
//! `memory::malloc` module layers chunk-splitting on top of page-sized blocks.
//!
//! This is ambient infrastructure, not one of the five core engines; it exists only so the rest
//! of the kernel can use ordinary Rust collections.

use crate::memory::buddy;
use core::{
	alloc::{GlobalAlloc, Layout},
	ptr::{self, NonNull},
};
use utils::{limits::PAGE_SIZE, lock::IntMutex, math};

/// Minimum alignment any chunk satisfies; matches the allocator's own header alignment.
const MIN_ALIGN: usize = 16;

/// A free chunk header, stored in-place at the start of the chunk it describes.
struct FreeChunk {
	/// Size of the chunk, header included.
	size: usize,
	next: Option<NonNull<FreeChunk>>,
}

struct Heap {
	free_list: Option<NonNull<FreeChunk>>,
}

// SAFETY: the heap is only ever touched through `HEAP_LOCK`.
unsafe impl Send for Heap {}

static HEAP_LOCK: IntMutex<Heap> = IntMutex::new(Heap { free_list: None });

impl Heap {
	/// Requests more memory from the buddy allocator and pushes it onto the free list as one
	/// large chunk, sized to satisfy at least `min_size`.
	fn grow(&mut self, min_size: usize) -> bool {
		let pages = math::round_up(min_size, PAGE_SIZE) / PAGE_SIZE;
		let order = pages.next_power_of_two().trailing_zeros() as usize;
		let Some(page) = buddy::alloc_kernel(order) else {
			return false;
		};
		let size = math::pow2(order) * PAGE_SIZE;
		self.push_chunk(page.cast(), size);
		true
	}

	fn push_chunk(&mut self, ptr: NonNull<u8>, size: usize) {
		let chunk = ptr.cast::<FreeChunk>();
		unsafe {
			chunk.as_ptr().write(FreeChunk {
				size,
				next: self.free_list,
			});
		}
		self.free_list = Some(chunk);
	}

	fn alloc(&mut self, layout: Layout) -> *mut u8 {
		let needed = math::round_up(
			layout.size() + core::mem::size_of::<FreeChunk>(),
			MIN_ALIGN,
		);
		if self.find_fit(needed).is_none() && !self.grow(needed) {
			return ptr::null_mut();
		}
		let prev_ptr = self.find_fit(needed).expect("grow just succeeded");
		self.remove(prev_ptr);
		// SAFETY: `prev_ptr` came from the free list we just removed it from.
		let chunk = unsafe { prev_ptr.as_ref() };
		let base = prev_ptr.cast::<u8>();
		let remainder = chunk.size - needed;
		if remainder >= core::mem::size_of::<FreeChunk>() + MIN_ALIGN {
			// Split: give back the tail as a new free chunk.
			let tail = unsafe { base.as_ptr().add(needed) };
			self.push_chunk(NonNull::new(tail).unwrap(), remainder);
		}
		unsafe { base.as_ptr().add(core::mem::size_of::<FreeChunk>()) }
	}

	fn find_fit(&self, needed: usize) -> Option<NonNull<FreeChunk>> {
		let mut cur = self.free_list;
		while let Some(c) = cur {
			let chunk = unsafe { c.as_ref() };
			if chunk.size >= needed {
				return Some(c);
			}
			cur = chunk.next;
		}
		None
	}

	fn remove(&mut self, target: NonNull<FreeChunk>) {
		if self.free_list == Some(target) {
			self.free_list = unsafe { target.as_ref().next };
			return;
		}
		let mut cur = self.free_list;
		while let Some(c) = cur {
			let next = unsafe { c.as_ref().next };
			if next == Some(target) {
				unsafe {
					(*c.as_ptr()).next = target.as_ref().next;
				}
				return;
			}
			cur = next;
		}
	}

	/// Returns the chunk to the free list. No coalescing: fragmentation is bounded by the size
	/// of kernel heap usage, which is small and dominated by fixed-size process/file-table
	/// structures.
	fn free(&mut self, ptr: *mut u8) {
		let base = unsafe { ptr.sub(core::mem::size_of::<FreeChunk>()) };
		let chunk = unsafe { NonNull::new_unchecked(base).cast::<FreeChunk>() };
		let size = unsafe { chunk.as_ref().size };
		self.push_chunk(chunk.cast(), size);
	}
}

/// The allocator registered as `#[global_allocator]`.
pub struct KernelHeap;

unsafe impl GlobalAlloc for KernelHeap {
	unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
		HEAP_LOCK.lock().alloc(layout)
	}

	unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
		HEAP_LOCK.lock().free(ptr);
	}
}

#[global_allocator]
static ALLOCATOR: KernelHeap = KernelHeap;

#[alloc_error_handler]
fn alloc_error(layout: Layout) -> ! {
	panic!("kernel heap exhausted allocating {layout:?}");
}
