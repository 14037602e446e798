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

//! Process-lifecycle, address-space, and identity system calls: `exit`/`clone`/`waitpid`/
//! `execve`, `vmop`, `uname`/`utime`, the clock family, and the pid/group/credential getters.

use crate::{
	error::{EResult, Errno},
	process::{
		self,
		ptr::{UserPtr, UserSlice},
	},
};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use macros::syscall;
use utils::errno;

#[syscall]
pub fn exit(code: i32) -> EResult<isize> {
	process::exit(code & 0xff, false, 0);
}

/// `clone` with a `flags` argument; this kernel only ever builds a whole new address space (see
/// the Non-goals in the crate root docs: there is no shared-memory thread support), so every
/// `clone` is a plain `fork` regardless of what `flags` asks for.
#[syscall]
pub fn clone(_flags: i32) -> EResult<isize> {
	Ok(process::fork()? as isize)
}

/// Encodes `(status, termsig)` into a POSIX-shaped wait status word: a clean exit carries its
/// low-order exit code in the high byte, a signal death carries the signal number in the low
/// seven bits.
fn encode_wait_status(status: i32, termsig: i32) -> i32 {
	if termsig != 0 {
		termsig & 0x7f
	} else {
		(status & 0xff) << 8
	}
}

#[syscall]
pub fn waitpid(pid: i32, stat_loc: UserPtr<i32>, _options: i32) -> EResult<isize> {
	let (child, status, termsig) = process::waitpid(pid)?;
	stat_loc.write(encode_wait_status(status, termsig))?;
	Ok(child as isize)
}

/// Reads a null-terminated array of user-space `const char*` pointers (an `argv`/`envp` vector),
/// stopping at the first null entry, and copies each string into an owned, nul-terminated byte
/// vector the way [`process::execve`] expects. Bounded by [`MAX_VECTOR_ENTRIES`] so a malformed
/// (unterminated) array can't loop forever.
const MAX_VECTOR_ENTRIES: usize = 256;

fn read_string_vector(vec: UserSlice<usize>) -> Result<Vec<Vec<u8>>, Errno> {
	let mut out = Vec::new();
	for i in 0..MAX_VECTOR_ENTRIES {
		let entry_ptr: UserPtr<usize> = UserPtr::from(vec.addr() + i * core::mem::size_of::<usize>());
		let entry = entry_ptr.read()?.ok_or(errno!(EFAULT))?;
		if entry == 0 {
			return Ok(out);
		}
		let str_ptr: UserPtr<u8> = UserPtr::from(entry);
		out.push(str_ptr.read_cstr()?);
	}
	Err(errno!(E2BIG))
}

#[syscall]
pub fn execve(path: UserPtr<u8>, argv: UserSlice<usize>, envp: UserSlice<usize>) -> EResult<isize> {
	let raw_path = path.read_cstr()?;
	let path = core::str::from_utf8(&raw_path).map_err(|_| errno!(EINVAL))?;
	let argv = read_string_vector(argv)?;
	let envp = read_string_vector(envp)?;
	process::execve(path, &argv, &envp)?;
	Ok(0)
}

/// `vo_op` values for [`VmopOptions`], matching the original `VMOP_OPERATION` enum's ordinals.
/// Only `OP_MAP`/`OP_UNMAP` are implemented, matching the demand-zero `VmOp` the design notes
/// describe; `OP_CHANGE_ACCESS`/`OP_SBRK` are accepted numerically but fail with `EINVAL`.
pub const OP_MAP: i32 = 0;
pub const OP_UNMAP: i32 = 1;

/// The `vmop` argument struct. Only `vo_op`, `vo_addr`, and `vo_len` are consulted: the
/// fd-backed/shared/fixed-address flavors the original header's flag bits describe are out of
/// scope (every mapping this kernel creates on behalf of `vmop` is anonymous demand-zero).
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct VmopOptions {
	pub vo_op: i32,
	pub vo_addr: usize,
	pub vo_len: usize,
	pub vo_flags: i32,
}

#[syscall]
pub fn vmop(opts: UserPtr<VmopOptions>) -> EResult<isize> {
	let o = opts.read()?.ok_or(errno!(EFAULT))?;
	let process = process::current();
	let result = {
		let mut p = process.lock();
		let vmspace = p.vmspace.as_mut().ok_or(errno!(EFAULT))?;
		match o.vo_op {
			OP_MAP => vmspace.vm_map(o.vo_len).map(|base| base as isize),
			OP_UNMAP => vmspace.vm_unmap(o.vo_addr, o.vo_len).map(|_| 0),
			_ => Err(errno!(EINVAL)),
		}
	}?;
	if o.vo_op == OP_MAP {
		let mut updated = o;
		updated.vo_addr = result as usize;
		opts.write(updated)?;
	}
	Ok(result)
}

/// A POSIX-shaped `struct utsname` projection, matching `dogfood/utsname.h`'s fixed 16-byte
/// fields exactly.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Utsname {
	pub sysname: [u8; 16],
	pub nodename: [u8; 16],
	pub release: [u8; 16],
	pub version: [u8; 16],
	pub machine: [u8; 16],
}

impl Default for Utsname {
	fn default() -> Self {
		Self {
			sysname: [0; 16],
			nodename: [0; 16],
			release: [0; 16],
			version: [0; 16],
			machine: [0; 16],
		}
	}
}

fn fill_field(dst: &mut [u8; 16], src: &[u8]) {
	let n = src.len().min(dst.len() - 1);
	dst[..n].copy_from_slice(&src[..n]);
}

#[syscall]
pub fn uname(buf: UserPtr<Utsname>) -> EResult<isize> {
	let mut uts = Utsname::default();
	fill_field(&mut uts.sysname, b"Dogfood");
	fill_field(&mut uts.nodename, b"localhost");
	fill_field(&mut uts.release, b"0.1.0");
	fill_field(&mut uts.version, b"0.1.0");
	fill_field(&mut uts.machine, b"x86_64");
	buf.write(uts)?;
	Ok(0)
}

/// `utime`'s `struct utimbuf` argument: a null pointer means "use the current time" (see
/// `utime(2)`); since there is no RTC collaborator in scope (see the clock family below), "the
/// current time" is this kernel's synthetic monotonic counter rather than wall-clock time.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct Utimbuf {
	pub actime: i64,
	pub modtime: i64,
}

#[syscall]
pub fn utime(path: UserPtr<u8>, times: UserPtr<Utimbuf>) -> EResult<isize> {
	let raw_path = path.read_cstr()?;
	let path = core::str::from_utf8(&raw_path).map_err(|_| errno!(EINVAL))?;
	let cwd = process::current().lock().cwd.clone().unwrap_or_else(crate::fs::root);
	let mut inode = crate::fs::namei(path, &cwd, true)?;
	let now = monotonic_nanos() as i64;
	let (atime, mtime) = match times.read()? {
		Some(t) => (t.actime, t.modtime),
		None => (now, now),
	};
	inode.disk.i_atime = atime as u32;
	inode.disk.i_mtime = mtime as u32;
	inode.dirty = true;
	Ok(0)
}

/// `struct timespec`, the wire shape every clock syscall reads and writes.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct Timespec {
	pub tv_sec: i64,
	pub tv_nsec: i64,
}

pub const CLOCK_REALTIME: i32 = 0;
pub const CLOCK_MONOTONIC: i32 = 1;

/// A synthetic nanosecond counter advanced once per syscall, in lieu of an RTC or PIT
/// collaborator (both out of scope; see the crate root docs). It is monotonic and otherwise
/// meaningless: `CLOCK_REALTIME` and `CLOCK_MONOTONIC` both read it, since without a real wall
/// clock there is nothing else to report for the former.
static TICKS: AtomicU64 = AtomicU64::new(0);

/// Advances and returns the synthetic clock. Called once per syscall dispatch (see
/// [`super::syscall_handler`]) so the counter actually progresses across the run, not just when
/// a clock syscall happens to be the one invoked.
pub fn tick() -> u64 {
	TICKS.fetch_add(1_000_000, Ordering::Relaxed)
}

fn monotonic_nanos() -> u64 {
	TICKS.load(Ordering::Relaxed)
}

#[syscall]
pub fn clock_gettime(_clock_id: i32, tp: UserPtr<Timespec>) -> EResult<isize> {
	let nanos = monotonic_nanos();
	tp.write(Timespec {
		tv_sec: (nanos / 1_000_000_000) as i64,
		tv_nsec: (nanos % 1_000_000_000) as i64,
	})?;
	Ok(0)
}

/// There is no wall clock to set (see [`TICKS`]); accepted and ignored rather than failing, the
/// same way a container without `CAP_SYS_TIME` still lets an unprivileged caller no-op this.
#[syscall]
pub fn clock_settime(_clock_id: i32, _tp: UserPtr<Timespec>) -> EResult<isize> {
	Ok(0)
}

#[syscall]
pub fn clock_getres(_clock_id: i32, res: UserPtr<Timespec>) -> EResult<isize> {
	res.write(Timespec { tv_sec: 0, tv_nsec: 1_000_000 })?;
	Ok(0)
}

/// Stubbed per the design notes ("Timeouts are not supported in this revision"): returns
/// immediately rather than actually suspending the caller.
#[syscall]
pub fn nanosleep(_rqtp: UserPtr<Timespec>, rmtp: UserPtr<Timespec>) -> EResult<isize> {
	if !rmtp.is_null() {
		rmtp.write(Timespec::default())?;
	}
	Ok(0)
}

#[syscall]
pub fn getpgrp() -> EResult<isize> {
	Ok(process::current().lock().pgid as isize)
}

#[syscall]
pub fn setpgid(pid: i32, pgid: i32) -> EResult<isize> {
	let process = process::current();
	let mut p = process.lock();
	let target_pid = if pid == 0 { p.pid } else { pid };
	if target_pid != p.pid {
		return Err(errno!(ESRCH));
	}
	p.pgid = if pgid == 0 { target_pid } else { pgid };
	Ok(0)
}

#[syscall]
pub fn setsid() -> EResult<isize> {
	let process = process::current();
	let mut p = process.lock();
	p.sid = p.pid;
	p.pgid = p.pid;
	Ok(p.pid as isize)
}

#[syscall]
pub fn getsid(pid: i32) -> EResult<isize> {
	let process = process::current();
	let p = process.lock();
	if pid == 0 || pid == p.pid {
		return Ok(p.sid as isize);
	}
	Err(errno!(ESRCH))
}

#[syscall]
pub fn getuid() -> EResult<isize> {
	Ok(process::current().lock().uid as isize)
}

#[syscall]
pub fn geteuid() -> EResult<isize> {
	Ok(process::current().lock().euid as isize)
}

#[syscall]
pub fn getgid() -> EResult<isize> {
	Ok(process::current().lock().gid as isize)
}

#[syscall]
pub fn getegid() -> EResult<isize> {
	Ok(process::current().lock().egid as isize)
}

#[syscall]
pub fn getpid() -> EResult<isize> {
	Ok(process::current().lock().pid as isize)
}

#[syscall]
pub fn getppid() -> EResult<isize> {
	Ok(process::current().lock().ppid as isize)
}

/// Stubbed: actually resetting the machine is the out-of-scope CPU bring-up layer's job (see the
/// crate root docs). Any `how` value fails with `EPERM`, matching what an unprivileged caller
/// would observe on a system that refuses the request outright.
#[syscall]
pub fn reboot(_how: i32) -> EResult<isize> {
	Err(errno!(EPERM))
}

/// Mirrors `dogfood/procinfo.h`'s `struct PROCINFO` exactly.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct ProcInfo {
	pub next_pid: i32,
	pub state: u8,
	pub name: [u8; 48],
}

fn state_char(state: process::State) -> u8 {
	match state {
		process::State::Unused => b'?',
		process::State::Construct => b'C',
		process::State::Runnable => b'r',
		process::State::Running => b'R',
		process::State::Zombie => b'Z',
		process::State::Sleeping | process::State::Stopped => b'S',
	}
}

/// Reports the next pid that will be allocated and, if `pid` names a live process, its
/// scheduling state. There is no process name stored anywhere in this kernel's `Process` struct
/// (only the in-core inode it was exec'd from), so `name` is always empty — a narrower
/// projection than the original header's field promises, documented rather than fabricated.
#[syscall]
pub fn procinfo(pid: i32, _pi_size: usize, pi: UserPtr<ProcInfo>) -> EResult<isize> {
	let info = if pid == 0 {
		ProcInfo { next_pid: process::peek_next_pid(), state: b'?', name: [0; 48] }
	} else {
		let state = process::state_of(pid).ok_or(errno!(ESRCH))?;
		ProcInfo { next_pid: process::peek_next_pid(), state: state_char(state), name: [0; 48] }
	};
	pi.write(info)?;
	Ok(0)
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn wait_status_encodes_normal_exit_in_high_byte() {
		assert_eq!(encode_wait_status(0, 0), 0);
		assert_eq!(encode_wait_status(1, 0), 1 << 8);
		assert_eq!(encode_wait_status(0x1ff, 0), 0xff << 8);
	}

	#[test]
	fn wait_status_encodes_termsig_in_low_bits() {
		assert_eq!(encode_wait_status(0, 9), 9);
		// a termsig always wins over whatever garbage is left in `status`.
		assert_eq!(encode_wait_status(42, 11), 11);
	}

	#[test]
	fn utsname_fields_are_nul_terminated_and_truncated() {
		let mut field = [0u8; 16];
		fill_field(&mut field, b"x86_64");
		assert_eq!(&field[..6], b"x86_64");
		assert_eq!(field[6], 0);

		let mut long = [0u8; 16];
		fill_field(&mut long, b"this string is far too long to fit");
		assert_eq!(long[15], 0);
		assert_eq!(&long[..15], b"this string is ");
	}

	#[test]
	fn state_char_matches_ps_convention() {
		assert_eq!(state_char(process::State::Running), b'R');
		assert_eq!(state_char(process::State::Runnable), b'r');
		assert_eq!(state_char(process::State::Sleeping), b'S');
		assert_eq!(state_char(process::State::Stopped), b'S');
		assert_eq!(state_char(process::State::Zombie), b'Z');
	}

	#[test]
	fn vmop_operations_are_distinct() {
		assert_ne!(OP_MAP, OP_UNMAP);
	}
}
