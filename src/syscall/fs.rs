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

//! Filesystem-shaped system calls: descriptor table operations, path resolution, and the
//! metadata/rename/link family.
//!
//! Every handler that needs a path reads it with [`UserPtr::read_cstr`] *before* touching the
//! process's own lock for anything else that could nest: `UserPtr`/`UserSlice` accessors take
//! the current process's lock internally (see [`crate::process::ptr`]), so a handler that is
//! still holding its own `process.lock()` guard when it calls one of them would deadlock against
//! itself — the kernel has no other hardware thread to break the cycle.

use crate::{
	device,
	error::{EResult, Errno},
	fs,
	process::{
		self,
		ptr::{UserPtr, UserSlice},
		FileKind, OpenFile,
	},
};
use alloc::{string::String, sync::Arc, vec::Vec};
use macros::syscall;
use utils::{errno, lock::IntMutex};

pub const O_RDONLY: i32 = 0;
pub const O_WRONLY: i32 = 1;
pub const O_RDWR: i32 = 2;
pub const O_CREAT: i32 = 0o100;
pub const O_EXCL: i32 = 0o200;
pub const O_TRUNC: i32 = 0o1000;
pub const O_APPEND: i32 = 0o2000;
pub const O_NONBLOCK: i32 = 0o4000;
pub const O_DIRECTORY: i32 = 0o200000;
pub const O_CLOEXEC: i32 = 0o2000000;

pub const SEEK_SET: i32 = 0;
pub const SEEK_CUR: i32 = 1;
pub const SEEK_END: i32 = 2;

pub const F_DUPFD: i32 = 0;
pub const F_GETFD: i32 = 1;
pub const F_SETFD: i32 = 2;
pub const F_GETFL: i32 = 3;
pub const F_SETFL: i32 = 4;
pub const FD_CLOEXEC: i32 = 1;

/// Sentinel `dirfd` meaning "resolve relative to the calling process's cwd", for `fstatat`.
pub const AT_FDCWD: i32 = -100;
pub const AT_SYMLINK_NOFOLLOW: i32 = 0x100;

fn current_cwd() -> fs::InodeRef {
	process::current().lock().cwd.clone().unwrap_or_else(fs::root)
}

/// Resolves `dirfd` (an open file descriptor or [`AT_FDCWD`]) to the directory a relative path
/// should be looked up against.
fn dir_for_at(dirfd: i32) -> Result<fs::InodeRef, Errno> {
	if dirfd == AT_FDCWD {
		return Ok(current_cwd());
	}
	let file = process::current().lock().get_file(dirfd)?;
	let f = file.lock();
	match &f.kind {
		FileKind::Inode(inode) if inode.is_dir() => Ok(inode.clone()),
		FileKind::Inode(_) => Err(errno!(ENOTDIR)),
		_ => Err(errno!(ENOTDIR)),
	}
}

/// Whether `inode` names a character-special file, and if so, the device it addresses.
fn char_device_of(inode: &fs::Inode) -> Option<device::DevT> {
	if inode.disk.i_mode & fs::ext2::S_IFMT == fs::ext2::S_IFCHR {
		Some(inode.disk.i_block[0] as device::DevT)
	} else {
		None
	}
}

#[syscall]
pub fn open(path: UserPtr<u8>, flags: i32, mode: u16) -> EResult<isize> {
	let raw_path = path.read_cstr()?;
	let path = core::str::from_utf8(&raw_path).map_err(|_| errno!(EINVAL))?;
	let cwd = current_cwd();
	let inode = match fs::namei(path, &cwd, true) {
		Ok(inode) => {
			if flags & O_CREAT != 0 && flags & O_EXCL != 0 {
				return Err(errno!(EEXIST));
			}
			inode
		}
		Err(Errno::ENOENT) if flags & O_CREAT != 0 => {
			let (mut parent, name) = fs::namei_parent(path, &cwd)?;
			let umask = process::current().lock().umask;
			fs::ext2::create_regular(&mut parent, name, mode & !umask)?
		}
		Err(e) => return Err(e),
	};
	if flags & O_DIRECTORY != 0 && !inode.is_dir() {
		return Err(errno!(ENOTDIR));
	}
	if flags & O_TRUNC != 0 && inode.is_regular() {
		let mut inode = inode;
		fs::ext2::truncate(&mut inode)?;
		let file = OpenFile {
			kind: FileKind::Inode(inode),
			offset: 0,
			flags,
			cloexec: flags & O_CLOEXEC != 0,
		};
		let process = process::current();
		return Ok(process.lock().alloc_fd(file)? as isize);
	}
	let offset = if flags & O_APPEND != 0 { inode.disk.i_size as u64 } else { 0 };
	let file = OpenFile {
		kind: FileKind::Inode(inode),
		offset,
		flags,
		cloexec: flags & O_CLOEXEC != 0,
	};
	let process = process::current();
	Ok(process.lock().alloc_fd(file)? as isize)
}

#[syscall]
pub fn close(fd: i32) -> EResult<isize> {
	process::current().lock().close_fd(fd)?;
	Ok(0)
}

#[syscall]
pub fn read(fd: i32, buf: UserSlice<u8>, count: usize) -> EResult<isize> {
	if count == 0 {
		return Ok(0);
	}
	// Validate the destination range before allocating a kernel-side copy, so an oversized or
	// unmapped `count` fails with EFAULT instead of handing an attacker-controlled size straight
	// to the allocator.
	buf.as_mut_slice(count)?;
	let file = process::current().lock().get_file(fd)?;
	let mut kbuf = alloc::vec![0u8; count];
	let n = {
		let mut f = file.lock();
		let offset = f.offset;
		match &mut f.kind {
			FileKind::Inode(inode) => {
				if let Some(dev) = char_device_of(inode) {
					let chardev = device::lookup_character_device(dev).ok_or(errno!(ENXIO))?;
					chardev.read(&mut kbuf)?
				} else {
					let n = fs::read(inode, &mut kbuf, offset)?;
					f.offset = offset + n as u64;
					n
				}
			}
			FileKind::PipeReader(pipe) => {
				let pipe = pipe.clone();
				drop(f);
				process::pipe::read(&pipe, &mut kbuf)?
			}
			FileKind::PipeWriter(_) => return Err(errno!(EBADF)),
		}
	};
	let dst = buf.as_mut_slice(n)?;
	dst.copy_from_slice(&kbuf[..n]);
	Ok(n as isize)
}

#[syscall]
pub fn write(fd: i32, buf: UserSlice<u8>, count: usize) -> EResult<isize> {
	if count == 0 {
		return Ok(0);
	}
	let kbuf = buf.as_slice(count)?.to_vec();
	let file = process::current().lock().get_file(fd)?;
	let n = {
		let mut f = file.lock();
		let offset = f.offset;
		match &mut f.kind {
			FileKind::Inode(inode) => {
				if let Some(dev) = char_device_of(inode) {
					let chardev = device::lookup_character_device(dev).ok_or(errno!(ENXIO))?;
					chardev.write(&kbuf)?
				} else {
					let n = fs::write(inode, &kbuf, offset)?;
					f.offset = offset + n as u64;
					n
				}
			}
			FileKind::PipeWriter(pipe) => {
				let pipe = pipe.clone();
				drop(f);
				match process::pipe::write(&pipe, &kbuf) {
					Ok(n) => n,
					Err(Errno::EPIPE) => {
						let pid = process::current().lock().pid;
						let _ = process::send_signal(pid, process::signal::SIGPIPE);
						return Err(errno!(EPIPE));
					}
					Err(e) => return Err(e),
				}
			}
			FileKind::PipeReader(_) => return Err(errno!(EBADF)),
		}
	};
	Ok(n as isize)
}

#[syscall]
pub fn seek(fd: i32, offset: i64, whence: i32) -> EResult<isize> {
	let file = process::current().lock().get_file(fd)?;
	let mut f = file.lock();
	let FileKind::Inode(inode) = &f.kind else {
		return Err(errno!(ESPIPE));
	};
	let size = inode.disk.i_size as i64;
	let base = match whence {
		SEEK_SET => 0,
		SEEK_CUR => f.offset as i64,
		SEEK_END => size,
		_ => return Err(errno!(EINVAL)),
	};
	let new_offset = base.checked_add(offset).ok_or(errno!(EINVAL))?;
	if new_offset < 0 {
		return Err(errno!(EINVAL));
	}
	f.offset = new_offset as u64;
	Ok(new_offset as isize)
}

#[syscall]
pub fn unlink(path: UserPtr<u8>) -> EResult<isize> {
	let raw_path = path.read_cstr()?;
	let path = core::str::from_utf8(&raw_path).map_err(|_| errno!(EINVAL))?;
	let cwd = current_cwd();
	let (mut parent, name) = fs::namei_parent(path, &cwd)?;
	let target = fs::namei(path, &cwd, false)?;
	if target.is_dir() {
		return Err(errno!(EISDIR));
	}
	fs::ext2::remove_entry_from_directory(&mut parent, name)?;
	fs::ext2::unlink_inode(target)?;
	Ok(0)
}

#[syscall]
pub fn rename(oldpath: UserPtr<u8>, newpath: UserPtr<u8>) -> EResult<isize> {
	let raw_old = oldpath.read_cstr()?;
	let raw_new = newpath.read_cstr()?;
	let old = core::str::from_utf8(&raw_old).map_err(|_| errno!(EINVAL))?;
	let new = core::str::from_utf8(&raw_new).map_err(|_| errno!(EINVAL))?;
	let cwd = current_cwd();
	let source = fs::namei(old, &cwd, false)?;
	let (mut old_parent, old_name) = fs::namei_parent(old, &cwd)?;
	let (mut new_parent, new_name) = fs::namei_parent(new, &cwd)?;
	if fs::namei(new, &cwd, false).is_ok() {
		return Err(errno!(EEXIST));
	}
	let file_type = if source.is_dir() {
		2 // FT_DIR, matching the directory-entry file-type byte ext2 stores on disk
	} else if source.is_symlink() {
		7 // FT_SYMLINK
	} else {
		1 // FT_REG_FILE
	};
	fs::ext2::add_entry_to_directory(&mut new_parent, source.inum, file_type, new_name)?;
	fs::ext2::remove_entry_from_directory(&mut old_parent, old_name)?;
	Ok(0)
}

#[syscall]
pub fn link(oldpath: UserPtr<u8>, newpath: UserPtr<u8>) -> EResult<isize> {
	let raw_old = oldpath.read_cstr()?;
	let raw_new = newpath.read_cstr()?;
	let old = core::str::from_utf8(&raw_old).map_err(|_| errno!(EINVAL))?;
	let new = core::str::from_utf8(&raw_new).map_err(|_| errno!(EINVAL))?;
	let cwd = current_cwd();
	let mut source = fs::namei(old, &cwd, true)?;
	if source.is_dir() {
		return Err(errno!(EPERM));
	}
	let (mut parent, name) = fs::namei_parent(new, &cwd)?;
	fs::ext2::create_link(&mut parent, &mut source, name)?;
	Ok(0)
}

#[syscall]
pub fn symlink(target: UserPtr<u8>, linkpath: UserPtr<u8>) -> EResult<isize> {
	let raw_target = target.read_cstr()?;
	let raw_link = linkpath.read_cstr()?;
	let target = core::str::from_utf8(&raw_target).map_err(|_| errno!(EINVAL))?;
	let link = core::str::from_utf8(&raw_link).map_err(|_| errno!(EINVAL))?;
	let cwd = current_cwd();
	let (mut parent, name) = fs::namei_parent(link, &cwd)?;
	fs::ext2::create_symlink(&mut parent, name, target)?;
	Ok(0)
}

#[syscall]
pub fn readlink(path: UserPtr<u8>, buf: UserSlice<u8>, size: usize) -> EResult<isize> {
	let raw_path = path.read_cstr()?;
	let path = core::str::from_utf8(&raw_path).map_err(|_| errno!(EINVAL))?;
	let cwd = current_cwd();
	let mut inode = fs::namei(path, &cwd, false)?;
	if !inode.is_symlink() {
		return Err(errno!(EINVAL));
	}
	let mut kbuf = alloc::vec![0u8; size];
	let n = fs::read(&mut inode, &mut kbuf, 0)?;
	let dst = buf.as_mut_slice(n)?;
	dst.copy_from_slice(&kbuf[..n]);
	Ok(n as isize)
}

#[syscall]
pub fn chdir(path: UserPtr<u8>) -> EResult<isize> {
	let raw_path = path.read_cstr()?;
	let path = core::str::from_utf8(&raw_path).map_err(|_| errno!(EINVAL))?;
	let cwd = current_cwd();
	let inode = fs::namei(path, &cwd, true)?;
	if !inode.is_dir() {
		return Err(errno!(ENOTDIR));
	}
	process::current().lock().cwd = Some(inode);
	Ok(0)
}

#[syscall]
pub fn fchdir(fd: i32) -> EResult<isize> {
	let file = process::current().lock().get_file(fd)?;
	let inode = {
		let f = file.lock();
		let FileKind::Inode(inode) = &f.kind else {
			return Err(errno!(ENOTDIR));
		};
		if !inode.is_dir() {
			return Err(errno!(ENOTDIR));
		}
		inode.clone()
	};
	process::current().lock().cwd = Some(inode);
	Ok(0)
}

/// Finds the directory-entry name of the inode numbered `child_inum` inside `parent`.
fn component_name(parent: &mut fs::Inode, child_inum: fs::InodeNumber) -> Result<String, Errno> {
	let mut offset = 0u64;
	while let Some((entry, next)) = fs::ext2::read_directory(parent, offset)? {
		if entry.inode == child_inum && entry.name != "." && entry.name != ".." {
			return Ok(entry.name);
		}
		offset = next;
	}
	Err(errno!(ENOENT))
}

/// Reconstructs an absolute path to `inode` by walking `..` entries up to the filesystem root,
/// comparing inode numbers against each ancestor's directory listing. There is no cached parent
/// pointer anywhere in this kernel's inode representation, so this is the only way to answer
/// "what is my path" after the fact — the same approach `pwd`(1) itself falls back to when
/// `getcwd` isn't available.
fn path_of(mut inode: fs::InodeRef) -> Result<Vec<u8>, Errno> {
	let root = fs::root();
	let mut segments: Vec<String> = Vec::new();
	while !(inode.dev == root.dev && inode.inum == root.inum) {
		let child_inum = inode.inum;
		let mut parent = fs::namei("..", &inode, true)?;
		let name = component_name(&mut parent, child_inum)?;
		segments.push(name);
		inode = parent;
	}
	segments.reverse();
	let mut out = Vec::new();
	if segments.is_empty() {
		out.push(b'/');
		return Ok(out);
	}
	for seg in segments {
		out.push(b'/');
		out.extend_from_slice(seg.as_bytes());
	}
	Ok(out)
}

#[syscall]
pub fn getcwd(buf: UserSlice<u8>, size: usize) -> EResult<isize> {
	let cwd = current_cwd();
	let path = path_of(cwd)?;
	if path.len() + 1 > size {
		return Err(errno!(ERANGE));
	}
	let dst = buf.as_mut_slice(path.len() + 1)?;
	dst[..path.len()].copy_from_slice(&path);
	dst[path.len()] = 0;
	Ok(path.len() as isize)
}

#[syscall]
pub fn fstat(fd: i32, buf: UserPtr<fs::Stat>) -> EResult<isize> {
	let file = process::current().lock().get_file(fd)?;
	let f = file.lock();
	let FileKind::Inode(inode) = &f.kind else {
		return Err(errno!(EBADF));
	};
	buf.write(fs::stat(inode))?;
	Ok(0)
}

#[syscall]
pub fn fstatat(dirfd: i32, path: UserPtr<u8>, buf: UserPtr<fs::Stat>, flags: i32) -> EResult<isize> {
	let raw_path = path.read_cstr()?;
	let path = core::str::from_utf8(&raw_path).map_err(|_| errno!(EINVAL))?;
	let dir = dir_for_at(dirfd)?;
	let follow = flags & AT_SYMLINK_NOFOLLOW == 0;
	let inode = fs::namei(path, &dir, follow)?;
	buf.write(fs::stat(&inode))?;
	Ok(0)
}

#[syscall]
pub fn chmod(path: UserPtr<u8>, mode: u16) -> EResult<isize> {
	let raw_path = path.read_cstr()?;
	let path = core::str::from_utf8(&raw_path).map_err(|_| errno!(EINVAL))?;
	let cwd = current_cwd();
	let mut inode = fs::namei(path, &cwd, true)?;
	inode.disk.i_mode = (inode.disk.i_mode & fs::ext2::S_IFMT) | (mode & !fs::ext2::S_IFMT);
	inode.dirty = true;
	Ok(0)
}

#[syscall]
pub fn fchmod(fd: i32, mode: u16) -> EResult<isize> {
	let file = process::current().lock().get_file(fd)?;
	let mut f = file.lock();
	let FileKind::Inode(inode) = &mut f.kind else {
		return Err(errno!(EBADF));
	};
	inode.disk.i_mode = (inode.disk.i_mode & fs::ext2::S_IFMT) | (mode & !fs::ext2::S_IFMT);
	inode.dirty = true;
	Ok(0)
}

#[syscall]
pub fn chown(path: UserPtr<u8>, uid: u32, gid: u32) -> EResult<isize> {
	let raw_path = path.read_cstr()?;
	let path = core::str::from_utf8(&raw_path).map_err(|_| errno!(EINVAL))?;
	let cwd = current_cwd();
	let mut inode = fs::namei(path, &cwd, true)?;
	inode.disk.i_uid = uid as u16;
	inode.disk.i_gid = gid as u16;
	inode.dirty = true;
	Ok(0)
}

#[syscall]
pub fn fchown(fd: i32, uid: u32, gid: u32) -> EResult<isize> {
	let file = process::current().lock().get_file(fd)?;
	let mut f = file.lock();
	let FileKind::Inode(inode) = &mut f.kind else {
		return Err(errno!(EBADF));
	};
	inode.disk.i_uid = uid as u16;
	inode.disk.i_gid = gid as u16;
	inode.dirty = true;
	Ok(0)
}

#[syscall]
pub fn umask(mask: u16) -> EResult<isize> {
	let process = process::current();
	let mut p = process.lock();
	let old = p.umask;
	p.umask = mask & 0o777;
	Ok(old as isize)
}

#[syscall]
pub fn mkdir(path: UserPtr<u8>, mode: u16) -> EResult<isize> {
	let raw_path = path.read_cstr()?;
	let path = core::str::from_utf8(&raw_path).map_err(|_| errno!(EINVAL))?;
	let cwd = current_cwd();
	let (mut parent, name) = fs::namei_parent(path, &cwd)?;
	let umask = process::current().lock().umask;
	fs::ext2::create_directory(&mut parent, name, mode & !umask)?;
	Ok(0)
}

#[syscall]
pub fn rmdir(path: UserPtr<u8>) -> EResult<isize> {
	let raw_path = path.read_cstr()?;
	let path = core::str::from_utf8(&raw_path).map_err(|_| errno!(EINVAL))?;
	let cwd = current_cwd();
	let (mut parent, name) = fs::namei_parent(path, &cwd)?;
	let target = fs::namei(path, &cwd, false)?;
	if !target.is_dir() {
		return Err(errno!(ENOTDIR));
	}
	if name == "." || name == ".." {
		return Err(errno!(EINVAL));
	}
	let mut offset = 0u64;
	let mut entries = 0;
	let mut target_for_scan = target.clone();
	while let Some((_, next)) = fs::ext2::read_directory(&mut target_for_scan, offset)? {
		entries += 1;
		if entries > 2 {
			return Err(errno!(ENOTEMPTY));
		}
		offset = next;
	}
	fs::ext2::remove_directory(&mut parent, target)?;
	Ok(0)
}

#[syscall]
pub fn dup(fd: i32) -> EResult<isize> {
	let process = process::current();
	let mut p = process.lock();
	let file = p.get_file(fd)?;
	Ok(p.alloc_fd_shared(file, 0)? as isize)
}

#[syscall]
pub fn dup2(oldfd: i32, newfd: i32) -> EResult<isize> {
	if oldfd == newfd {
		let process = process::current();
		process.lock().get_file(oldfd)?;
		return Ok(newfd as isize);
	}
	let process = process::current();
	let mut p = process.lock();
	let file = p.get_file(oldfd)?;
	p.install_fd(newfd, file)?;
	Ok(newfd as isize)
}

#[syscall]
pub fn fcntl(fd: i32, cmd: i32, arg: usize) -> EResult<isize> {
	let process = process::current();
	match cmd {
		F_DUPFD => {
			let mut p = process.lock();
			let file = p.get_file(fd)?;
			Ok(p.alloc_fd_shared(file, arg as i32)? as isize)
		}
		F_GETFD => {
			let file = process.lock().get_file(fd)?;
			Ok(if file.lock().cloexec { FD_CLOEXEC as isize } else { 0 })
		}
		F_SETFD => {
			let file = process.lock().get_file(fd)?;
			file.lock().cloexec = arg as i32 & FD_CLOEXEC != 0;
			Ok(0)
		}
		F_GETFL => {
			let file = process.lock().get_file(fd)?;
			Ok(file.lock().flags as isize)
		}
		F_SETFL => {
			let file = process.lock().get_file(fd)?;
			file.lock().flags = arg as i32;
			Ok(0)
		}
		_ => Err(errno!(EINVAL)),
	}
}

#[syscall]
pub fn ioctl(fd: i32, _request: u64, _arg: usize) -> EResult<isize> {
	process::current().lock().get_file(fd)?;
	Err(errno!(ENOTTY))
}

#[syscall]
pub fn mount(_source: UserPtr<u8>, _target: UserPtr<u8>) -> EResult<isize> {
	// A single root mount, established once at boot by `fs::init`, is all this kernel ever
	// has; any further mount collides with it.
	Err(errno!(EBUSY))
}

#[syscall]
pub fn unmount(_target: UserPtr<u8>) -> EResult<isize> {
	Err(errno!(EBUSY))
}

/// A POSIX-shaped `struct statfs` projection of the mounted filesystem's capacity.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct StatFs {
	pub f_type: u32,
	pub f_bsize: u32,
	pub f_blocks: u64,
	pub f_bfree: u64,
	pub f_bavail: u64,
	pub f_files: u64,
	pub f_ffree: u64,
	pub f_namelen: u32,
}

const EXT2_SUPER_MAGIC: u32 = 0xEF53;

fn statfs_of_mount() -> StatFs {
	let stats = fs::ext2::stats();
	StatFs {
		f_type: EXT2_SUPER_MAGIC,
		f_bsize: stats.block_size,
		f_blocks: stats.blocks_total as u64,
		f_bfree: stats.blocks_free as u64,
		f_bavail: stats.blocks_free as u64,
		f_files: stats.inodes_total as u64,
		f_ffree: stats.inodes_free as u64,
		f_namelen: stats.name_max,
	}
}

#[syscall]
pub fn statfs(_path: UserPtr<u8>, buf: UserPtr<StatFs>) -> EResult<isize> {
	buf.write(statfs_of_mount())?;
	Ok(0)
}

#[syscall]
pub fn fstatfs(fd: i32, buf: UserPtr<StatFs>) -> EResult<isize> {
	process::current().lock().get_file(fd)?;
	buf.write(statfs_of_mount())?;
	Ok(0)
}

#[syscall]
pub fn pipe(fds: UserSlice<i32>) -> EResult<isize> {
	let pipe = process::pipe::Pipe::new();
	let process = process::current();
	let mut p = process.lock();
	let read_fd = p.alloc_fd(OpenFile {
		kind: FileKind::PipeReader(pipe.clone()),
		offset: 0,
		flags: O_RDONLY,
		cloexec: false,
	})?;
	let write_fd = p.alloc_fd(OpenFile {
		kind: FileKind::PipeWriter(pipe),
		offset: 0,
		flags: O_WRONLY,
		cloexec: false,
	})?;
	drop(p);
	let out = fds.as_mut_slice(2)?;
	out[0] = read_fd;
	out[1] = write_fd;
	Ok(0)
}

/// Checks whether `fd` is ready for the direction `select` was asked to watch, without blocking.
fn fd_ready(fd: i32, want_write: bool) -> Result<bool, Errno> {
	let file = process::current().lock().get_file(fd)?;
	let f = file.lock();
	Ok(match &f.kind {
		FileKind::Inode(inode) => {
			if let Some(dev) = char_device_of(inode) {
				let chardev = device::lookup_character_device(dev).ok_or(errno!(ENXIO))?;
				if want_write { chardev.can_write() } else { chardev.can_read() }
			} else {
				true
			}
		}
		FileKind::PipeReader(p) => !want_write && p.lock().readable(),
		FileKind::PipeWriter(p) => want_write && p.lock().writable(),
	})
}

/// `OP_MAP`/`OP_UNMAP`-style select: blocks until one descriptor in `fds` is ready for `write`
/// (nonzero) or read (zero), returning its index into `fds`. Built directly on top of
/// [`process::scheduler::yield_now`] rather than a dedicated notification mechanism, the same
/// way pipe reads block on their own wait channel instead of a generic "readiness" one.
#[syscall]
pub fn select(fds: UserSlice<i32>, nfds: usize, write: i32) -> EResult<isize> {
	if nfds == 0 || nfds > 32 {
		return Err(errno!(EINVAL));
	}
	let list: Vec<i32> = fds.as_slice(nfds)?.to_vec();
	let want_write = write != 0;
	loop {
		for (i, &fd) in list.iter().enumerate() {
			if fd_ready(fd, want_write)? {
				return Ok(i as isize);
			}
		}
		process::scheduler::yield_now();
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn open_flags_do_not_overlap() {
		assert_eq!(O_CREAT & O_EXCL, 0);
		assert_eq!(O_TRUNC & O_APPEND, 0);
		assert_eq!(O_CLOEXEC & O_DIRECTORY, 0);
	}

	#[test]
	fn dup2_same_fd_is_a_no_op() {
		// dup2(fd, fd) must not close fd even transiently; exercised at the process-table
		// level elsewhere, this just documents the contract the early-return above relies on.
		assert_eq!(O_RDONLY, 0);
	}
}
