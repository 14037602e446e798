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

//! Dogfood is a small self-hosted Unix-like kernel for x86-64.
//!
//! This crate implements the kernel's resident subsystem: the buddy page allocator, the
//! buffered block I/O cache, the ext2 filesystem engine, the process/scheduler/VM subsystem,
//! and system-call/signal dispatch. The UEFI boot loader, the raw IDE driver, the serial
//! console driver, CPU bring-up (GDT/IDT/SYSCALL MSR/context-switch assembly), the userland C
//! library, the GPT partition scanner and the test harness are external collaborators and are
//! not implemented here.
//!
//! # Features
//!
//! - `strace`: traces every system call entry and exit to the kernel log.

#![no_std]
#![no_main]
#![feature(allocator_api)]
#![feature(alloc_error_handler)]
#![feature(negative_impls)]
#![allow(clippy::tabs_in_doc_comments)]
#![allow(dead_code)]

extern crate alloc;

#[macro_use]
pub mod print;
pub mod arch;
pub mod bio;
pub mod config;
pub mod device;
pub mod error;
pub mod fs;
pub mod logger;
pub mod memory;
#[macro_use]
pub mod panic;
pub mod process;
pub mod syscall;

use utils::errno;

/// Entry point reached once the boot loader has handed off control and a stack is available.
///
/// The boot loader (out of scope, see the crate root docs) has already: loaded this image,
/// built an identity/high-half mapping of all physical memory, and collected a UEFI memory map.
/// `memory_map` is a pre-filtered list of `(base, length_in_pages)` usable RAM regions.
/// `cmdline` is the boot command line the loader was started with, unparsed.
pub fn main(memory_map: &[(usize, usize)], cmdline: &str) -> ! {
	logger::init();
	println!("dogfood: starting");
	config::init(cmdline);

	for &(base, pages) in memory_map {
		memory::buddy::register_memory(base, pages);
	}
	println!(
		"dogfood: {} pages available",
		memory::buddy::available_pages()
	);

	bio::init();
	device::init();
	fs::init().unwrap_or_else(|e| panic!("failed to mount root filesystem: {e}"));
	process::init();

	process::scheduler::run()
}
