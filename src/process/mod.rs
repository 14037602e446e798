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

//! The process table, the cooperative scheduler built on top of it, and everything that hangs
//! off a process: its address space, open files, and signal state.
//!
//! There is exactly one logical CPU and kernel code never preempts itself (see the concurrency
//! model in the design notes); the process table is therefore guarded by the same
//! interrupt-disabling [`IntMutex`] as every other kernel-global structure, not a scheduler
//! lock of its own.

pub mod exec;
pub mod pipe;
pub mod ptr;
pub mod regs;
pub mod scheduler;
pub mod signal;

use crate::{
	arch,
	error::Errno,
	fs,
	memory::{buddy, buddy::PageRef, vmspace::VMSpace},
};
use alloc::{sync::Arc, vec::Vec};
use regs::Regs;
use utils::{
	errno,
	limits::{NPROC, OPEN_MAX},
	lock::IntMutex,
};

pub type Pid = i32;

/// Order of the kernel stack allocation handed to every process: `2` is 4 pages (16 KiB),
/// enough depth for the trap-entry path plus whatever the running syscall handler needs.
const KERNEL_STACK_ORDER: usize = 2;

/// A process's lifecycle, matching the state machine in the design notes exactly.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum State {
	Unused,
	Construct,
	Runnable,
	Running,
	Sleeping,
	Stopped,
	Zombie,
}

/// One end of an open file: either a filesystem inode at a byte offset, or an anonymous pipe
/// end.
pub enum FileKind {
	Inode(fs::InodeRef),
	PipeReader(Arc<IntMutex<pipe::Pipe>>),
	PipeWriter(Arc<IntMutex<pipe::Pipe>>),
}

pub struct OpenFile {
	pub kind: FileKind,
	pub offset: u64,
	pub flags: i32,
	pub cloexec: bool,
}

/// Closing the last reference to a pipe end (an explicit `close`, a `dup2` overwrite, or a
/// process exiting with the descriptor still open) must unblock whatever is sleeping on the
/// other end; tying that to `Drop` means every path that makes an `OpenFile` go away gets it
/// for free, instead of every caller remembering to notify the pipe by hand.
impl Drop for OpenFile {
	fn drop(&mut self) {
		match &self.kind {
			FileKind::PipeReader(p) => pipe::close_reader(p),
			FileKind::PipeWriter(p) => pipe::close_writer(p),
			FileKind::Inode(_) => {}
		}
	}
}

/// A process control block.
pub struct Process {
	pub pid: Pid,
	pub ppid: Pid,
	pub pgid: Pid,
	pub sid: Pid,
	state: State,

	pub uid: u32,
	pub gid: u32,
	pub euid: u32,
	pub egid: u32,
	pub umask: u16,

	pub vmspace: Option<VMSpace>,
	kernel_stack: Option<PageRef>,
	/// Saved kernel stack pointer, restored by [`arch::switch_to`] when this process is next
	/// scheduled.
	context_sp: usize,

	/// Opaque identity of the channel this process is sleeping on; meaningful only while
	/// `state == Sleeping`.
	wait_channel: usize,

	pub cwd: Option<fs::InodeRef>,
	pub files: Vec<Option<Arc<IntMutex<OpenFile>>>>,

	pub signals: signal::SignalState,

	pub exit_status: i32,
	pub termsig: i32,
	/// Set once this process has exited and is waiting to be reaped by `waitpid`.
	waitable: bool,

	/// PID of the tracer, if this process is being ptraced (see the crate root docs: the
	/// tracer/tracee protocol itself is an out-of-scope collaborator; this is only the
	/// bookkeeping `waitpid`/signal-delivery consult).
	pub tracer: Option<Pid>,
}

impl Process {
	pub fn state(&self) -> State {
		self.state
	}

	/// Marks this process `Running`. Called by the scheduler loop right before switching into
	/// it.
	pub(super) fn set_running(&mut self) {
		self.state = State::Running;
	}

	/// Marks this process `Runnable`. Called by [`scheduler::yield_now`] for a process that
	/// was `Running` and is merely giving up its turn (as opposed to `sleep_on`, `exit`, or a
	/// ptrace stop, which set a different state themselves before yielding).
	pub(super) fn set_runnable(&mut self) {
		self.state = State::Runnable;
	}

	/// The saved kernel stack pointer `switch_to` resumes this process at.
	pub(super) fn context_sp(&self) -> usize {
		self.context_sp
	}

	/// A pointer to the `context_sp` slot itself, for `switch_to` to overwrite with the
	/// outgoing context on the next yield.
	pub(super) fn context_sp_mut_ptr(&mut self) -> *mut usize {
		&mut self.context_sp as *mut usize
	}

	/// Installs `file` in the first free slot of this process's descriptor table, returning
	/// its index. Fails with `EMFILE` once [`OPEN_MAX`] descriptors are already in use.
	pub fn alloc_fd(&mut self, file: OpenFile) -> Result<i32, Errno> {
		let slot = self.files.iter_mut().position(|f| f.is_none()).ok_or(errno!(EMFILE))?;
		self.files[slot] = Some(Arc::new(IntMutex::new(file)));
		Ok(slot as i32)
	}

	/// Installs `file` at a specific descriptor index (used by `dup2`), replacing (and
	/// implicitly closing) whatever was there before.
	pub fn install_fd(&mut self, fd: i32, file: Arc<IntMutex<OpenFile>>) -> Result<(), Errno> {
		let slot = self.files.get_mut(fd as usize).ok_or(errno!(EBADF))?;
		*slot = Some(file);
		Ok(())
	}

	/// Installs an already-shared `file` handle (as opposed to [`alloc_fd`](Self::alloc_fd),
	/// which wraps a fresh `OpenFile`) in the first free slot at or above `min_fd`. The `dup`
	/// family needs this: `dup`'s new descriptor and the old one must refer to the very same
	/// `OpenFile` (and so the same cursor offset), not two independent ones.
	pub fn alloc_fd_shared(&mut self, file: Arc<IntMutex<OpenFile>>, min_fd: i32) -> Result<i32, Errno> {
		let start = min_fd.max(0) as usize;
		let slot = self
			.files
			.iter_mut()
			.enumerate()
			.skip(start)
			.find(|(_, f)| f.is_none())
			.ok_or(errno!(EMFILE))?
			.0;
		self.files[slot] = Some(file);
		Ok(slot as i32)
	}

	/// Looks up a live file descriptor, returning a cloned handle to its shared [`OpenFile`].
	pub fn get_file(&self, fd: i32) -> Result<Arc<IntMutex<OpenFile>>, Errno> {
		self.files
			.get(fd as usize)
			.and_then(|f| f.clone())
			.ok_or(errno!(EBADF))
	}

	/// Closes a file descriptor, dropping the kernel's reference to it (the last reference
	/// drops the underlying inode/pipe end).
	pub fn close_fd(&mut self, fd: i32) -> Result<(), Errno> {
		let slot = self.files.get_mut(fd as usize).ok_or(errno!(EBADF))?;
		if slot.take().is_none() {
			return Err(errno!(EBADF));
		}
		Ok(())
	}
}

struct Table {
	slots: [Option<Arc<IntMutex<Process>>>; NPROC],
}

static TABLE: IntMutex<Table> = IntMutex::new(Table {
	slots: [const { None }; NPROC],
});

static CURRENT: IntMutex<Option<Arc<IntMutex<Process>>>> = IntMutex::new(None);

static NEXT_PID: IntMutex<Pid> = IntMutex::new(1);

fn alloc_pid() -> Pid {
	let mut next = NEXT_PID.lock();
	let pid = *next;
	*next += 1;
	pid
}

/// Allocates a process table slot in the `Construct` state, with a fresh kernel stack and an
/// empty (but correctly sized) file descriptor table. The caller finishes construction (sets
/// up the address space and initial trap frame) before moving the process to `Runnable`.
fn alloc_process(ppid: Pid) -> Result<Arc<IntMutex<Process>>, Errno> {
	let kernel_stack = buddy::alloc_zeroed(KERNEL_STACK_ORDER).ok_or(errno!(ENOMEM))?;
	let mut files = Vec::new();
	files.resize_with(OPEN_MAX as usize, || None);
	let process = Arc::new(IntMutex::new(Process {
		pid: alloc_pid(),
		ppid,
		pgid: ppid,
		sid: ppid,
		state: State::Construct,
		uid: 0,
		gid: 0,
		euid: 0,
		egid: 0,
		umask: 0o022,
		vmspace: None,
		kernel_stack: Some(kernel_stack),
		context_sp: 0,
		wait_channel: 0,
		cwd: None,
		files,
		signals: signal::SignalState::default(),
		exit_status: 0,
		termsig: 0,
		waitable: false,
		tracer: None,
	}));
	let mut table = TABLE.lock();
	let slot = table
		.slots
		.iter_mut()
		.find(|s| s.is_none())
		.ok_or(errno!(EAGAIN))?;
	*slot = Some(process.clone());
	Ok(process)
}

/// Boots the first process (`pid` 1, `ppid` 0), mounting it at the filesystem root with a
/// minimal signal/fd state, and runs `execve` on `init_path` to give it a real program image.
pub fn init() {
	let process = alloc_process(0).unwrap_or_else(|e| panic!("failed to allocate init process: {e}"));
	{
		let mut p = process.lock();
		p.cwd = Some(fs::root());
		let argv = [Vec::from(*b"/sbin/init")];
		let loaded = exec::exec("/sbin/init", p.cwd.as_ref().unwrap(), &argv, &[])
			.unwrap_or_else(|e| panic!("failed to exec init: {e}"));
		p.vmspace = Some(loaded.vmspace);
		install_initial_frame(&mut p, loaded.entry, loaded.stack_pointer);
		p.state = State::Runnable;
	}
}

/// Writes the trap frame a brand-new process resumes into for the first time: userland entry
/// point and stack, zeroed general-purpose registers, user code/data segment selectors that
/// the CPU bring-up layer's GDT already established.
fn install_initial_frame(process: &mut Process, entry: usize, stack_pointer: usize) {
	let mut regs = Regs::default();
	regs.rip = entry as u64;
	regs.rsp = stack_pointer as u64;
	regs.rflags = 0x202; // IF set, reserved bit 1 set; no other flags asserted at entry.
	write_trapframe(process, &regs);
	process.context_sp = trapframe_ptr(process) as usize;
}

/// The trap frame always lives at the very top of the kernel stack: trap entry pushes it there
/// before calling into Rust, and `trap_return` restores from the same offset.
fn trapframe_ptr(process: &Process) -> *mut Regs {
	let stack = process.kernel_stack.as_ref().expect("process has no kernel stack");
	let stack_size = crate::memory::PAGE_SIZE << stack.order();
	let top = stack.as_mut_ptr() as usize + stack_size - core::mem::size_of::<Regs>();
	top as *mut Regs
}

fn write_trapframe(process: &mut Process, regs: &Regs) {
	let ptr = trapframe_ptr(process);
	// SAFETY: `ptr` is within the process's own kernel stack, which it alone ever addresses
	// while not running.
	unsafe { ptr.write(regs.clone()) };
}

/// Returns the currently running process. Must only be called from a context where one exists
/// (syscall/trap handling); panics otherwise, which is a kernel bug rather than something a
/// caller recovers from.
pub fn current() -> Arc<IntMutex<Process>> {
	CURRENT.lock().clone().expect("no process is currently running")
}

/// Puts the calling (current) process to sleep on `channel` and yields the CPU. Returns once
/// some other process calls [`wakeup`] with the same channel and the scheduler picks this
/// process again.
pub fn sleep_on(channel: usize) {
	let process = current();
	{
		let mut p = process.lock();
		p.wait_channel = channel;
		p.state = State::Sleeping;
	}
	scheduler::yield_now();
}

/// Wakes every process sleeping on `channel`, moving it to `Runnable`.
pub fn wakeup(channel: usize) {
	let table = TABLE.lock();
	for slot in table.slots.iter().flatten() {
		let mut p = slot.lock();
		if p.state == State::Sleeping && p.wait_channel == channel {
			p.state = State::Runnable;
			p.wait_channel = 0;
		}
	}
}

/// Marks the calling process `Stopped` and yields. Returns once some other process `SIGCONT`s
/// it back to `Runnable` (see [`send_signal`]) and the scheduler picks it again.
pub fn stop_current() {
	let process = current();
	{
		let mut p = process.lock();
		p.state = State::Stopped;
	}
	scheduler::yield_now();
}

/// Sends `sig` to the process with pid `pid`, waking it if it was sleeping so the signal is
/// observed promptly.
pub fn send_signal(pid: Pid, sig: i32) -> Result<(), Errno> {
	let table = TABLE.lock();
	let slot = table
		.slots
		.iter()
		.flatten()
		.find(|p| p.lock().pid == pid)
		.ok_or(errno!(ESRCH))?;
	let mut p = slot.lock();
	p.signals.raise(sig);
	if p.state == State::Sleeping {
		p.state = State::Runnable;
	}
	if p.state == State::Stopped && (sig == signal::SIGKILL || sig == signal::SIGCONT) {
		p.state = State::Runnable;
	}
	Ok(())
}

/// Forks the current process: clones its address space (copy, not copy-on-write; see the
/// design notes), duplicates its file table honoring `O_CLOEXEC` only at `execve`, not fork, and
/// builds a trap frame identical to the parent's but with the child's return value already set
/// to `0` (the parent keeps its own saved frame and returns the child's pid through the normal
/// syscall-return path).
pub fn fork() -> Result<Pid, Errno> {
	let parent = current();
	let child = alloc_process(parent.lock().pid)?;
	{
		let mut parent = parent.lock();
		let mut child = child.lock();
		let mut new_space = VMSpace::new()?;
		new_space.clone_mappings(parent.vmspace.as_ref().expect("forking process has no address space"))?;
		child.vmspace = Some(new_space);
		child.cwd = parent.cwd.clone();
		child.uid = parent.uid;
		child.gid = parent.gid;
		child.euid = parent.euid;
		child.egid = parent.egid;
		child.umask = parent.umask;
		child.pgid = parent.pgid;
		child.sid = parent.sid;
		for (dst, src) in child.files.iter_mut().zip(parent.files.iter()) {
			*dst = src.clone();
		}
		let mut regs = unsafe { &*trapframe_ptr(&parent) }.clone();
		regs.set_syscall_return(Ok(0));
		write_trapframe(&mut child, &regs);
		child.context_sp = trapframe_ptr(&child) as usize;
		child.state = State::Runnable;
	}
	Ok(child.lock().pid)
}

/// Terminates the current process: marks it `Zombie`, records its exit status, reparents its
/// children to pid 1, and wakes anyone waiting on the process table (its parent's `waitpid`).
pub fn exit(status: i32, signaled: bool, termsig: i32) -> ! {
	let process = current();
	let pid = {
		let mut p = process.lock();
		p.exit_status = status;
		p.termsig = if signaled { termsig } else { 0 };
		p.waitable = true;
		p.state = State::Zombie;
		p.pid
	};
	{
		let table = TABLE.lock();
		for slot in table.slots.iter().flatten() {
			let mut child = slot.lock();
			if child.ppid == pid {
				child.ppid = 1;
			}
		}
	}
	let ppid = process.lock().ppid;
	wakeup(process_table_channel());
	let _ = send_signal(ppid, signal::SIGCHLD);
	scheduler::yield_now();
	unreachable!("a zombie process must never be scheduled again");
}

fn process_table_channel() -> usize {
	&TABLE as *const _ as usize
}

/// The pid that will be handed out by the next [`alloc_pid`] call, without consuming it.
/// `procinfo`'s `next_pid` field reports this.
pub fn peek_next_pid() -> Pid {
	*NEXT_PID.lock()
}

/// The scheduling state of the live process named `pid`, or `None` if no such process exists.
pub fn state_of(pid: Pid) -> Option<State> {
	let table = TABLE.lock();
	table
		.slots
		.iter()
		.flatten()
		.find(|p| p.lock().pid == pid)
		.map(|p| p.lock().state())
}

/// Scans the current process's children for a zombie, reaping it (freeing its kernel stack and
/// address space, and freeing its table slot) and returning its pid, exit status, and
/// terminating signal (`0` if the child called `exit` normally rather than dying of a signal).
/// Sleeps if children exist but none are zombies yet; fails with `ECHILD` if there are no
/// children at all.
pub fn waitpid(target: Pid) -> Result<(Pid, i32, i32), Errno> {
	let me = current().lock().pid;
	loop {
		let mut any_children = false;
		{
			let mut table = TABLE.lock();
			for slot in table.slots.iter_mut() {
				let is_match = slot
					.as_ref()
					.map(|p| {
						let p = p.lock();
						p.ppid == me && (target == -1 || p.pid == target)
					})
					.unwrap_or(false);
				if !is_match {
					continue;
				}
				any_children = true;
				let is_zombie = slot.as_ref().unwrap().lock().state == State::Zombie;
				if is_zombie {
					let child = slot.take().unwrap();
					let mut c = child.lock();
					let pid = c.pid;
					let status = c.exit_status;
					let termsig = c.termsig;
					c.kernel_stack.take();
					c.vmspace.take();
					c.state = State::Unused;
					return Ok((pid, status, termsig));
				}
			}
		}
		if !any_children {
			return Err(errno!(ECHILD));
		}
		sleep_on(process_table_channel());
	}
}

/// Replaces the current process's address space and initial register state with a freshly
/// loaded program image. On success there is no return to the caller in the usual sense: the
/// syscall dispatcher installs the returned trap frame in place of the one it entered with.
///
/// Descriptors opened with `O_CLOEXEC` do not survive the image switch; every other descriptor
/// stays open across `execve`, matching [`fork`]'s unconditional duplication.
pub fn execve(path: &str, argv: &[Vec<u8>], envp: &[Vec<u8>]) -> Result<(), Errno> {
	let process = current();
	let mut p = process.lock();
	let cwd = p.cwd.clone().unwrap_or_else(fs::root);
	let loaded = exec::exec(path, &cwd, argv, envp)?;
	p.vmspace = Some(loaded.vmspace);
	install_initial_frame(&mut p, loaded.entry, loaded.stack_pointer);
	for slot in p.files.iter_mut() {
		if slot.as_ref().map(|f| f.lock().cloexec).unwrap_or(false) {
			slot.take();
		}
	}
	Ok(())
}
