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

//! Pending-signal bookkeeping and delivery at the syscall-return boundary.
//!
//! Multi-signal nesting is not supported: while a handler is running (`handling` is `Some`),
//! newly raised signals still set their pending bit but are not delivered again until
//! `sigreturn` clears `handling`.

use super::{regs::Regs, Process};
use alloc::boxed::Box;
use utils::errno;

pub const NSIG: usize = 32;

pub const SIGHUP: i32 = 1;
pub const SIGINT: i32 = 2;
pub const SIGQUIT: i32 = 3;
pub const SIGILL: i32 = 4;
pub const SIGABRT: i32 = 6;
pub const SIGFPE: i32 = 8;
pub const SIGKILL: i32 = 9;
pub const SIGSEGV: i32 = 11;
pub const SIGPIPE: i32 = 13;
pub const SIGALRM: i32 = 14;
pub const SIGTERM: i32 = 15;
pub const SIGCHLD: i32 = 17;
pub const SIGCONT: i32 = 18;
pub const SIGSTOP: i32 = 19;
pub const SIGTSTP: i32 = 20;
pub const SIGTTIN: i32 = 21;
pub const SIGTTOU: i32 = 22;

/// A process's disposition for one signal number: the handler sentinel plus the ancillary
/// fields `sigaction(2)` lets userland set alongside it. `mask`/`flags`/`restorer` are only
/// meaningful when `handler` is [`Handler::Handler`], but are stored regardless so a later
/// `sigaction` that only changes the handler doesn't need to special-case them.
#[derive(Clone, Copy, Debug, Default)]
pub struct Action {
	pub handler: Handler,
	/// Additional signals blocked for the duration of this handler, on top of `sig` itself
	/// (unless `SA_NODEFER` is set).
	pub mask: u64,
	pub flags: i32,
	/// Userland trampoline address pushed as the handler's return address; invokes
	/// `sigreturn`.
	pub restorer: usize,
}

/// A process's disposition for one signal number.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum Handler {
	#[default]
	Default,
	Ignore,
	Handler(usize),
}

pub const SA_NODEFER: i32 = 1 << 7;

/// The outcome of applying a signal's default disposition when no handler is installed.
enum Disposition {
	Terminate,
	CoreDump,
	Ignore,
	Stop,
	Continue,
}

fn default_disposition(sig: i32) -> Disposition {
	match sig {
		SIGCHLD => Disposition::Ignore,
		SIGCONT => Disposition::Continue,
		SIGSTOP | SIGTSTP | SIGTTIN | SIGTTOU => Disposition::Stop,
		SIGQUIT | SIGILL | SIGABRT | SIGFPE | SIGSEGV => Disposition::CoreDump,
		_ => Disposition::Terminate,
	}
}

/// Per-process signal bookkeeping.
pub struct SignalState {
	/// Bitset of blocked signal numbers (bit `n` = signal `n` is blocked). `SIGKILL`/`SIGSTOP`
	/// can never be set here; callers attempting to block them are rejected at `sigprocmask`.
	pub mask: u64,
	/// Bitset of signals raised but not yet delivered.
	pub pending: u64,
	pub actions: [Action; NSIG],
	/// Signal number currently being handled, if any. `sigreturn` clears this.
	pub handling: Option<i32>,
	/// Trap frame saved at the point a handler was invoked, restored verbatim by `sigreturn`.
	pub saved_regs: Option<Box<Regs>>,
	/// `mask` as it stood before entering the current handler, restored by `sigreturn`.
	pub saved_mask: u64,
}

impl Default for SignalState {
	fn default() -> Self {
		Self {
			mask: 0,
			pending: 0,
			actions: [Action::default(); NSIG],
			handling: None,
			saved_regs: None,
			saved_mask: 0,
		}
	}
}

impl SignalState {
	pub fn raise(&mut self, sig: i32) {
		if (1..NSIG as i32).contains(&sig) {
			self.pending |= 1 << sig;
		}
	}

	fn highest_deliverable(&self) -> Option<i32> {
		(1..NSIG as i32)
			.rev()
			.find(|&sig| self.pending & (1 << sig) != 0 && (sig == SIGKILL || self.mask & (1 << sig) == 0))
	}
}

/// What the syscall-return path should do about a process's pending signals.
pub enum Delivery {
	/// Nothing pending (or everything pending is masked/ignored).
	None,
	/// The process should terminate, optionally having core-dumped; both are modeled the same
	/// way at this layer, since this kernel never writes a core file.
	Terminate(i32),
	/// The process should move to `Stopped` and yield.
	Stop,
	/// The process was `Stopped` and a `SIGCONT` arrived; move it back to `Runnable`.
	Resume,
	/// A user handler should run: build a synthetic frame with `arch::deliver_signal`.
	Handler(i32, Action),
	/// The process is ptrace-traced: relay `sig` to the tracer instead of applying its normal
	/// disposition.
	Traced(i32),
}

/// Decides what to do with `process`'s pending signals, consuming (clearing) every signal that
/// is discarded (ignored or already handled by its default no-op disposition) along the way,
/// and the one signal actually acted upon.
///
/// A ptrace-traced process (`process.tracer.is_some()`) never applies its own disposition for a
/// non-`SIGKILL` signal: the signal is relayed to the tracer instead (see [`Delivery::Traced`]),
/// matching the relay described in the design notes. A full register peek/poke protocol on top
/// of that relay is out of scope.
pub fn decide(process: &mut Process) -> Delivery {
	if process.signals.handling.is_some() {
		return Delivery::None;
	}
	loop {
		let Some(sig) = process.signals.highest_deliverable() else {
			return Delivery::None;
		};
		process.signals.pending &= !(1 << sig);
		if sig == SIGKILL {
			return Delivery::Terminate(sig);
		}
		if process.tracer.is_some() {
			return Delivery::Traced(sig);
		}
		let action = process.signals.actions[sig as usize];
		match action.handler {
			Handler::Ignore => continue,
			Handler::Handler(_) => return Delivery::Handler(sig, action),
			Handler::Default => match default_disposition(sig) {
				Disposition::Ignore => continue,
				Disposition::Terminate | Disposition::CoreDump => return Delivery::Terminate(sig),
				Disposition::Stop => return Delivery::Stop,
				Disposition::Continue => return Delivery::Resume,
			},
		}
	}
}

/// Rewrites `regs` to enter `action`'s handler for `sig`, stashing the pristine frame and mask
/// for `sigreturn` to restore, and blocking `sig` itself (unless `SA_NODEFER`) plus `action`'s
/// own mask for the handler's duration.
pub fn enter_handler(process: &mut Process, regs: &mut Regs, sig: i32, action: Action) {
	let Handler::Handler(handler) = action.handler else {
		unreachable!("enter_handler called with a non-Handler disposition");
	};
	process.signals.saved_regs = Some(Box::new(regs.clone()));
	process.signals.saved_mask = process.signals.mask;
	process.signals.handling = Some(sig);
	let mut block = action.mask;
	if action.flags & SA_NODEFER == 0 {
		block |= 1 << sig;
	}
	process.signals.mask |= block;
	// SAFETY: `regs` names the trap frame about to be restored by `trap_return`; the
	// trampoline pushes a siginfo_t and `action.restorer` as the return address onto the
	// user stack beneath it.
	unsafe { crate::arch::deliver_signal(regs, handler, action.restorer, sig) };
}

/// Implements the `sigreturn` syscall: restores the frame and mask saved by [`enter_handler`].
pub fn sigreturn(process: &mut Process, regs: &mut Regs) -> Result<(), crate::error::Errno> {
	let Some(saved) = process.signals.saved_regs.take() else {
		return Err(errno!(EINVAL));
	};
	process.signals.handling = None;
	process.signals.mask = process.signals.saved_mask;
	*regs = *saved;
	Ok(())
}
