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

//! The narrow boundary between this crate and the out-of-scope CPU bring-up layer.
//!
//! Everything in `entry.S` (GDT/IDT/TSS setup, the SYSCALL MSR trampoline, the actual context
//! switch, UART and ATA port I/O) is supplied by an external collaborator; this module only
//! declares the extern "C" signatures the rest of the kernel calls through, plus the
//! direct-physical-memory-map arithmetic every subsystem that walks page tables needs.

use crate::process::regs::Regs;

extern "C" {
	/// Saves the current kernel stack pointer to `*prev_sp` (a slot inside the outgoing
	/// process's `Process` struct) and switches execution to `next_sp`. Returns when some
	/// other call to `switch_to` later switches back into this context.
	pub fn switch_to(prev_sp: *mut usize, next_sp: usize);

	/// Restores `regs` onto the CPU and returns to userland via `iretq`/`sysretq`. Never
	/// returns to its caller.
	pub fn trap_return(regs: *const Regs) -> !;

	/// Rewrites `regs` so that, once restored by [`trap_return`], execution resumes in the
	/// signal handler at `handler` instead of where the trap frame was originally captured.
	/// `sig` is the signal number being delivered, passed as the handler's first argument;
	/// `restorer` is pushed onto the user stack as the handler's return address, so that an
	/// ordinary `ret` from the handler invokes it (and it, in turn, calls `sigreturn`).
	pub fn deliver_signal(regs: *mut Regs, handler: usize, restorer: usize, sig: i32);

	/// Writes one byte to the serial console. Used by [`crate::logger`]; never blocks longer
	/// than the UART's transmit-buffer-empty wait.
	pub fn serial_write_byte(b: u8);

	/// Reads one buffered byte from the serial console's input ring, or returns a negative
	/// value if none is available.
	pub fn console_read_byte() -> i32;

	/// Returns whether the serial console has buffered input ready.
	pub fn console_can_read() -> bool;

	/// Performs one synchronous sector-granular transfer against the primary IDE channel.
	/// Returns the number of sectors transferred, or a negative `-errno` on failure.
	pub fn ide_perform_io(write: bool, lba: u64, buf: *mut u8, sector_count: u32) -> i32;

	/// Physical address of the kernel's own top-level page table, built once by CPU bring-up
	/// before any Rust code runs. Every userland address space's kernel half is copied from
	/// this table's entries, never constructed from scratch.
	pub fn kernel_pml4_phys() -> usize;

	/// Loads `pml4_phys` into `cr3`, switching the currently active address space. Called by
	/// the scheduler on every context switch.
	pub fn load_page_directory(pml4_phys: usize);

	/// Invalidates the TLB entry covering `va`, following a page-table edit that changes an
	/// already-present mapping.
	pub fn invalidate_page(va: usize);
}

/// Base virtual address of the direct physical-memory mapping the boot loader installs before
/// handing off control (see [`crate::main`]): physical address `p` is always accessible at
/// `DIRECT_MAP_BASE + p`.
pub const DIRECT_MAP_BASE: usize = 0xffff_8000_0000_0000;

/// Converts a physical address to its direct-mapped virtual address.
pub const fn phys_to_virt(phys: usize) -> usize {
	DIRECT_MAP_BASE + phys
}

/// Converts a direct-mapped virtual address back to the physical address it maps.
pub const fn virt_to_phys(virt: usize) -> usize {
	virt - DIRECT_MAP_BASE
}
