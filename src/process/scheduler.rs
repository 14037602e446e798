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

//! The cooperative scheduler loop.
//!
//! The loop itself runs on its own context (`SCHEDULER_SP`), exactly like every other
//! schedulable context: picking a process calls [`arch::switch_to`] away from the loop and into
//! that process's saved kernel stack pointer; the process calls it again (from [`yield_now`],
//! reached through `sleep_on`, `exit`, or an explicit yield) to come back. A process's
//! `context_sp` is primed at construction time to the address of its trap frame, the contract
//! the CPU bring-up layer's `switch_to`/trap-entry assembly (out of scope, see the crate root
//! docs) uses to know where to resume a process that has never yet run.

use super::{State, Table, CURRENT, TABLE};
use crate::arch;
use utils::lock::IntMutex;

static SCHEDULER_SP: IntMutex<usize> = IntMutex::new(0);

fn pick_runnable(table: &Table) -> Option<usize> {
	table
		.slots
		.iter()
		.position(|s| s.as_ref().map(|p| p.lock().state() == State::Runnable).unwrap_or(false))
}

/// Runs the scheduler loop forever. Called once, after [`super::init`], from [`crate::main`].
pub fn run() -> ! {
	loop {
		let next = {
			let table = TABLE.lock();
			pick_runnable(&table).and_then(|i| table.slots[i].clone())
		};
		let Some(process) = next else {
			// Nothing runnable: wait for the next interrupt (disk completion, timer) to make
			// progress possible again.
			core::hint::spin_loop();
			continue;
		};
		let context_sp = {
			let mut p = process.lock();
			p.set_running();
			p.context_sp()
		};
		*CURRENT.lock() = Some(process.clone());
		let pml4 = process.lock().vmspace.as_ref().map(|v| v.pml4_phys()).unwrap_or(0);
		if pml4 != 0 {
			// SAFETY: `pml4` is a table this process's own `VMSpace` owns and keeps alive.
			unsafe { arch::load_page_directory(pml4) };
		}
		// Take a pointer to the slot and release the guard before switching away: the process
		// we're switching into may itself call `yield_now`, which locks `SCHEDULER_SP` to read
		// it back, and that lock must not still be held by this (suspended) context when it does.
		let scheduler_sp_slot = &mut *SCHEDULER_SP.lock() as *mut usize;
		// SAFETY: `context_sp` names either a freshly primed trap frame or a point this same
		// process previously yielded from via `switch_to`; both are valid resume points by the
		// CPU bring-up layer's contract. `scheduler_sp_slot` points into `SCHEDULER_SP`'s
		// 'static storage, which outlives the guard that produced it.
		unsafe { arch::switch_to(scheduler_sp_slot, context_sp) };
		*CURRENT.lock() = None;
	}
}

/// Yields the CPU back to the scheduler loop. Called by `sleep_on` (after marking the process
/// Sleeping) and by any process whose state has already been set to something other than
/// `Running` (`Zombie`, `Stopped`) before the call.
pub fn yield_now() {
	let process = super::current();
	{
		let mut p = process.lock();
		if p.state() == State::Running {
			p.set_runnable();
		}
	}
	let scheduler_sp = *SCHEDULER_SP.lock();
	let sp_slot = process.lock().context_sp_mut_ptr();
	// SAFETY: `scheduler_sp` is the loop's own saved context, always valid once `run` has
	// started; `sp_slot` is this process's own context-pointer storage.
	unsafe { arch::switch_to(sp_slot, scheduler_sp) };
}
