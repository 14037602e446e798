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

//! Signal-disposition and -mask system calls.
//!
//! `sigreturn` is conspicuously absent: it has to replace the calling process's entire trap
//! frame, which needs a `&mut Regs` the [`macros::syscall`] calling convention doesn't hand a
//! handler (every other syscall only ever touches its own argument registers and a return
//! value). It is dispatched directly by [`super::syscall_handler`] instead.

use crate::{
	error::EResult,
	process::{self, ptr::UserPtr, signal},
};
use macros::syscall;
use utils::errno;

/// The wire shape of `struct sigaction`: matches `dogfood/signal.h` field-for-field, including
/// the never-consulted `sa_sigaction`, which this kernel keeps only so the struct's layout
/// matches what a conforming libc hands over.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct Sigaction {
	pub sa_handler: usize,
	pub sa_mask: u64,
	pub sa_flags: i32,
	pub sa_sigaction: usize,
	pub sa_restorer: usize,
}

const SIG_DFL: usize = 0;
const SIG_IGN: usize = 1;

pub const SIG_BLOCK: i32 = 0;
pub const SIG_SETMASK: i32 = 1;
pub const SIG_UNBLOCK: i32 = 2;

/// `SIGKILL`/`SIGSTOP` can never be blocked, masked, or caught; every mask this kernel accepts
/// from userland has these two bits scrubbed on the way in.
fn unblockable_mask() -> u64 {
	(1 << signal::SIGKILL) | (1 << signal::SIGSTOP)
}

fn action_from_wire(s: Sigaction) -> signal::Action {
	let handler = match s.sa_handler {
		SIG_DFL => signal::Handler::Default,
		SIG_IGN => signal::Handler::Ignore,
		addr => signal::Handler::Handler(addr),
	};
	signal::Action {
		handler,
		mask: s.sa_mask & !unblockable_mask(),
		flags: s.sa_flags,
		restorer: s.sa_restorer,
	}
}

fn action_to_wire(a: signal::Action) -> Sigaction {
	let sa_handler = match a.handler {
		signal::Handler::Default => SIG_DFL,
		signal::Handler::Ignore => SIG_IGN,
		signal::Handler::Handler(addr) => addr,
	};
	Sigaction {
		sa_handler,
		sa_mask: a.mask,
		sa_flags: a.flags,
		sa_sigaction: 0,
		sa_restorer: a.restorer,
	}
}

/// Sends `sig` to a single process named by pid. The negative/zero `pid` forms `kill(2)` defines
/// for process-group and broadcast delivery are not modeled (this kernel tracks `pgid` as a
/// label on each process but never builds a group→members index to fan a signal out over), so
/// any non-positive `pid` fails with `EINVAL` rather than silently targeting only `pid`'s own
/// process.
#[syscall]
pub fn kill(pid: i32, sig: i32) -> EResult<isize> {
	if pid <= 0 {
		return Err(errno!(EINVAL));
	}
	if !(1..signal::NSIG as i32).contains(&sig) {
		return Err(errno!(EINVAL));
	}
	process::send_signal(pid, sig)?;
	Ok(0)
}

/// Reads `act` before touching the process's own lock, then locks once to swap the disposition
/// and capture the old one, then writes `oact` after releasing it: `UserPtr` accessors lock the
/// current process internally (see [`super::fs`]'s module docs), so a handler already holding
/// its own `process.lock()` guard when it calls one would deadlock against itself.
#[syscall]
pub fn sigaction(sig: i32, act: UserPtr<Sigaction>, oact: UserPtr<Sigaction>) -> EResult<isize> {
	if !(1..signal::NSIG as i32).contains(&sig) {
		return Err(errno!(EINVAL));
	}
	if sig == signal::SIGKILL || sig == signal::SIGSTOP {
		return Err(errno!(EINVAL));
	}
	let new_action = act.read()?.map(action_from_wire);
	let process = process::current();
	let old = {
		let mut p = process.lock();
		let old = p.signals.actions[sig as usize];
		if let Some(new) = new_action {
			p.signals.actions[sig as usize] = new;
		}
		old
	};
	if !oact.is_null() {
		oact.write(action_to_wire(old))?;
	}
	Ok(0)
}

#[syscall]
pub fn sigprocmask(how: i32, set: UserPtr<u64>, oset: UserPtr<u64>) -> EResult<isize> {
	let requested = set.read()?;
	let process = process::current();
	let old = {
		let mut p = process.lock();
		let old = p.signals.mask;
		if let Some(requested) = requested {
			let requested = requested & !unblockable_mask();
			p.signals.mask = match how {
				SIG_BLOCK => p.signals.mask | requested,
				SIG_UNBLOCK => p.signals.mask & !requested,
				SIG_SETMASK => requested,
				_ => return Err(errno!(EINVAL)),
			};
		}
		old
	};
	if !oset.is_null() {
		oset.write(old)?;
	}
	Ok(0)
}

/// Temporarily replaces the calling process's mask with `sigmask` and suspends it until a signal
/// arrives that is deliverable under that mask, then restores the previous mask and fails with
/// `EINTR` — `sigsuspend(2)` never returns on success.
#[syscall]
pub fn sigsuspend(sigmask: UserPtr<u64>) -> EResult<isize> {
	let requested = sigmask.read()?.ok_or(errno!(EFAULT))? & !unblockable_mask();
	let process = process::current();
	let saved = {
		let mut p = process.lock();
		let saved = p.signals.mask;
		p.signals.mask = requested;
		saved
	};
	loop {
		{
			let p = process.lock();
			if p.signals.pending & !p.signals.mask != 0 {
				break;
			}
		}
		process::scheduler::yield_now();
	}
	process.lock().signals.mask = saved;
	Err(errno!(EINTR))
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn unblockable_mask_covers_only_kill_and_stop() {
		let mask = unblockable_mask();
		assert_eq!(mask, (1 << signal::SIGKILL) | (1 << signal::SIGSTOP));
		assert_eq!(mask & (1 << signal::SIGTERM), 0);
	}

	#[test]
	fn action_wire_round_trips_default_and_ignore() {
		let dfl = Sigaction { sa_handler: SIG_DFL, ..Default::default() };
		assert!(matches!(action_from_wire(dfl).handler, signal::Handler::Default));

		let ign = Sigaction { sa_handler: SIG_IGN, ..Default::default() };
		assert!(matches!(action_from_wire(ign).handler, signal::Handler::Ignore));

		let back = action_to_wire(action_from_wire(dfl));
		assert_eq!(back.sa_handler, SIG_DFL);
	}

	#[test]
	fn action_wire_round_trips_handler_address() {
		let custom = Sigaction { sa_handler: 0x4000_1000, sa_mask: 0xff, sa_flags: 1, ..Default::default() };
		let action = action_from_wire(custom);
		assert!(matches!(action.handler, signal::Handler::Handler(0x4000_1000)));
		assert_eq!(action.flags, 1);

		let wire = action_to_wire(action);
		assert_eq!(wire.sa_handler, 0x4000_1000);
		assert_eq!(wire.sa_flags, 1);
	}

	#[test]
	fn action_from_wire_scrubs_unblockable_bits_from_mask() {
		let s = Sigaction { sa_handler: SIG_DFL, sa_mask: u64::MAX, ..Default::default() };
		let action = action_from_wire(s);
		assert_eq!(action.mask & (1 << signal::SIGKILL), 0);
		assert_eq!(action.mask & (1 << signal::SIGSTOP), 0);
		assert_ne!(action.mask & (1 << signal::SIGTERM), 0);
	}
}
