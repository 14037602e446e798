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

//! The syscall dispatcher: the dense numeric table, the `extern "C"` entry point the CPU
//! bring-up trampoline jumps to, and the post-syscall signal-delivery check.

pub mod fs;
pub mod process;
pub mod signal;

use crate::{
	error::EResult,
	process::{regs::Regs, signal::Delivery},
};
use utils::errno;

/// The dense syscall number table, matching `dogfood/syscall.h` exactly for numbers 0-58;
/// `pipe`/`select` are extensions this kernel adds beyond the original header (see §11 of the
/// design notes), numbered past the original table's end rather than reusing a gap.
mod numbers {
	pub const EXIT: usize = 0;
	pub const READ: usize = 1;
	pub const WRITE: usize = 2;
	pub const OPEN: usize = 3;
	pub const CLOSE: usize = 4;
	pub const UNLINK: usize = 5;
	pub const SEEK: usize = 6;
	pub const CLONE: usize = 7;
	pub const WAITPID: usize = 8;
	pub const EXECVE: usize = 9;
	pub const VMOP: usize = 10;
	pub const DUP: usize = 11;
	pub const RENAME: usize = 12;
	pub const UNAME: usize = 13;
	pub const CHDIR: usize = 14;
	pub const FSTAT: usize = 15;
	pub const FCHDIR: usize = 16;
	pub const FCNTL: usize = 17;
	pub const LINK: usize = 18;
	pub const UTIME: usize = 19;
	pub const CLOCK_SETTIME: usize = 20;
	pub const CLOCK_GETTIME: usize = 21;
	pub const CLOCK_GETRES: usize = 22;
	pub const READLINK: usize = 23;
	// 24 was SYS_lstat in the original table; never implemented there either.
	pub const GETCWD: usize = 25;
	pub const SIGACTION: usize = 26;
	pub const SIGPROCMASK: usize = 27;
	pub const SIGSUSPEND: usize = 28;
	pub const KILL: usize = 29;
	pub const SIGRETURN: usize = 30;
	pub const IOCTL: usize = 31;
	pub const GETPGRP: usize = 32;
	pub const SETPGID: usize = 33;
	pub const SETSID: usize = 34;
	pub const DUP2: usize = 35;
	pub const MOUNT: usize = 36;
	pub const UNMOUNT: usize = 37;
	pub const STATFS: usize = 38;
	pub const FSTATFS: usize = 39;
	pub const NANOSLEEP: usize = 40;
	pub const GETSID: usize = 41;
	pub const GETUID: usize = 42;
	pub const GETEUID: usize = 43;
	pub const GETGID: usize = 44;
	pub const GETEGID: usize = 45;
	pub const GETPID: usize = 46;
	pub const GETPPID: usize = 47;
	pub const SYMLINK: usize = 48;
	pub const REBOOT: usize = 49;
	pub const CHOWN: usize = 50;
	pub const FCHOWN: usize = 51;
	pub const UMASK: usize = 52;
	pub const CHMOD: usize = 53;
	pub const MKDIR: usize = 54;
	pub const RMDIR: usize = 55;
	pub const FCHMOD: usize = 56;
	pub const PROCINFO: usize = 57;
	pub const FSTATAT: usize = 58;
	pub const PIPE: usize = 59;
	pub const SELECT: usize = 60;
}

/// Looks up and invokes the handler for `nr`, returning `ENOSYS` for anything outside the table.
/// `sigreturn` is handled by [`syscall_handler`] directly, before this is ever reached, since it
/// needs to replace the whole trap frame rather than just produce a return value.
fn dispatch(nr: usize, regs: &Regs) -> EResult<isize> {
	use numbers::*;
	match nr {
		EXIT => process::exit(regs),
		READ => fs::read(regs),
		WRITE => fs::write(regs),
		OPEN => fs::open(regs),
		CLOSE => fs::close(regs),
		UNLINK => fs::unlink(regs),
		SEEK => fs::seek(regs),
		CLONE => process::clone(regs),
		WAITPID => process::waitpid(regs),
		EXECVE => process::execve(regs),
		VMOP => process::vmop(regs),
		DUP => fs::dup(regs),
		RENAME => fs::rename(regs),
		UNAME => process::uname(regs),
		CHDIR => fs::chdir(regs),
		FSTAT => fs::fstat(regs),
		FCHDIR => fs::fchdir(regs),
		FCNTL => fs::fcntl(regs),
		LINK => fs::link(regs),
		UTIME => process::utime(regs),
		CLOCK_SETTIME => process::clock_settime(regs),
		CLOCK_GETTIME => process::clock_gettime(regs),
		CLOCK_GETRES => process::clock_getres(regs),
		READLINK => fs::readlink(regs),
		GETCWD => fs::getcwd(regs),
		SIGACTION => signal::sigaction(regs),
		SIGPROCMASK => signal::sigprocmask(regs),
		SIGSUSPEND => signal::sigsuspend(regs),
		KILL => signal::kill(regs),
		IOCTL => fs::ioctl(regs),
		GETPGRP => process::getpgrp(regs),
		SETPGID => process::setpgid(regs),
		SETSID => process::setsid(regs),
		DUP2 => fs::dup2(regs),
		MOUNT => fs::mount(regs),
		UNMOUNT => fs::unmount(regs),
		STATFS => fs::statfs(regs),
		FSTATFS => fs::fstatfs(regs),
		NANOSLEEP => process::nanosleep(regs),
		GETSID => process::getsid(regs),
		GETUID => process::getuid(regs),
		GETEUID => process::geteuid(regs),
		GETGID => process::getgid(regs),
		GETEGID => process::getegid(regs),
		GETPID => process::getpid(regs),
		GETPPID => process::getppid(regs),
		SYMLINK => fs::symlink(regs),
		REBOOT => process::reboot(regs),
		CHOWN => fs::chown(regs),
		FCHOWN => fs::fchown(regs),
		UMASK => fs::umask(regs),
		CHMOD => fs::chmod(regs),
		MKDIR => fs::mkdir(regs),
		RMDIR => fs::rmdir(regs),
		FCHMOD => fs::fchmod(regs),
		PROCINFO => process::procinfo(regs),
		FSTATAT => fs::fstatat(regs),
		PIPE => fs::pipe(regs),
		SELECT => fs::select(regs),
		_ => Err(errno!(ENOSYS)),
	}
}

/// Applies whatever [`crate::process::signal::decide`] finds pending for the current process,
/// right before resuming userland. Runs after every syscall, including `sigreturn` itself (a
/// handler's own `sigreturn` can easily uncover another signal that arrived while it ran).
fn deliver_pending_signals(regs: &mut Regs) {
	loop {
		let process = crate::process::current();
		let delivery = {
			let mut p = process.lock();
			crate::process::signal::decide(&mut p)
		};
		match delivery {
			Delivery::None => return,
			Delivery::Terminate(sig) => {
				crate::process::exit(128 + sig, true, sig);
			}
			Delivery::Stop => {
				crate::process::stop_current();
			}
			Delivery::Resume => {
				// Already applied to the process's state by `decide`'s caller reading it back
				// into `Runnable`; nothing left to do here but re-check for another pending
				// signal.
			}
			Delivery::Traced(_sig) => {
				// Relay to the tracer as a `Stopped` transition plus `SIGCHLD`, rather than
				// applying the signal's own disposition; there is no register peek/poke
				// protocol on top of this relay (see the design notes).
				let tracer = process.lock().tracer;
				if let Some(tracer_pid) = tracer {
					let _ = crate::process::send_signal(tracer_pid, crate::process::signal::SIGCHLD);
				}
				crate::process::stop_current();
			}
			Delivery::Handler(sig, action) => {
				let mut p = process.lock();
				crate::process::signal::enter_handler(&mut p, regs, sig, action);
				return;
			}
		}
	}
}

/// The entry point the CPU bring-up trampoline calls after saving a trap frame for a `syscall`
/// instruction. `regs` is the same memory as the current process's saved trap frame (see the
/// crate root docs on trap-frame aliasing), so writes here are visible the moment `trap_return`
/// restores it — there is no separate copy-back step.
#[no_mangle]
pub extern "C" fn syscall_handler(regs: &mut Regs) {
	let nr = regs.syscall_nr as usize;
	process::tick();
	if nr == numbers::SIGRETURN {
		let process = crate::process::current();
		let mut p = process.lock();
		let _ = crate::process::signal::sigreturn(&mut p, regs);
	} else {
		let ret = dispatch(nr, regs);
		regs.set_syscall_return(ret);
	}
	deliver_pending_signals(regs);
}

#[cfg(test)]
mod test {
	use super::numbers::*;

	#[test]
	fn syscall_numbers_are_dense_and_unique() {
		let nrs = [
			EXIT, READ, WRITE, OPEN, CLOSE, UNLINK, SEEK, CLONE, WAITPID, EXECVE, VMOP, DUP,
			RENAME, UNAME, CHDIR, FSTAT, FCHDIR, FCNTL, LINK, UTIME, CLOCK_SETTIME,
			CLOCK_GETTIME, CLOCK_GETRES, READLINK, GETCWD, SIGACTION, SIGPROCMASK, SIGSUSPEND,
			KILL, SIGRETURN, IOCTL, GETPGRP, SETPGID, SETSID, DUP2, MOUNT, UNMOUNT, STATFS,
			FSTATFS, NANOSLEEP, GETSID, GETUID, GETEUID, GETGID, GETEGID, GETPID, GETPPID,
			SYMLINK, REBOOT, CHOWN, FCHOWN, UMASK, CHMOD, MKDIR, RMDIR, FCHMOD, PROCINFO,
			FSTATAT, PIPE, SELECT,
		];
		for (i, &a) in nrs.iter().enumerate() {
			for &b in &nrs[i + 1..] {
				assert_ne!(a, b, "duplicate syscall number {a}");
			}
		}
		assert_eq!(EXIT, 0);
		assert_eq!(FSTATAT, 58);
		assert_eq!(PIPE, 59);
		assert_eq!(SELECT, 60);
	}
}
