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

//! The amd64 trap frame: the fixed-layout record the SYSCALL-entry trampoline (out of scope,
//! see the crate root docs) saves onto a process's kernel stack before handing control to
//! Rust, and that [`crate::arch::trap_return`] restores on the way back out.
//!
//! Declared as a plain struct rather than aliased onto raw assembly offsets; the trampoline and
//! this struct agree on field order only by convention (the two are written and maintained
//! together), which is why the field order here must never change without updating the
//! trampoline.

use utils::errno::EResult;

/// General-purpose and control registers captured at a trap (syscall, exception, or
/// interrupt). Field order matches the order the trampoline pushes them in; do not reorder.
#[derive(Clone, Debug, Default)]
#[repr(C)]
pub struct Regs {
	pub r15: u64,
	pub r14: u64,
	pub r13: u64,
	pub r12: u64,
	pub r11: u64,
	pub r10: u64,
	pub r9: u64,
	pub r8: u64,
	pub rbp: u64,
	pub rdi: u64,
	pub rsi: u64,
	pub rdx: u64,
	pub rcx: u64,
	pub rbx: u64,
	pub rax: u64,

	/// The syscall number at entry, preserved separately from `rax` so it survives the
	/// handler overwriting `rax` with a return value.
	pub syscall_nr: u64,

	pub rip: u64,
	pub cs: u64,
	pub rflags: u64,
	pub rsp: u64,
	pub ss: u64,
}

impl Regs {
	/// Writes a syscall handler's result into the slot `trap_return` will restore as `rax`,
	/// negating an `Errno` per the ABI described in the crate root docs.
	pub fn set_syscall_return(&mut self, value: EResult<isize>) {
		self.rax = match value {
			Ok(v) => v as u64,
			Err(e) => (-e.as_i32()) as i64 as u64,
		};
	}

	/// Arguments 1..6 in amd64 SysV syscall ABI order, as the `#[syscall]` macro reads them.
	pub fn syscall_args(&self) -> [u64; 6] {
		[self.rdi, self.rsi, self.rdx, self.r10, self.r8, self.r9]
	}
}
