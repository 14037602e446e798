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

//! The ext2 filesystem engine: on-disk structures, the superblock/block-group bookkeeping, and
//! the block/inode allocation and directory-entry manipulation the VFS-lite layer in
//! [`super`] drives.
//!
//! Ported from the reference kernel's `ext2.cpp`, kept bit-exact on the wire: revision 0/1
//! superblock, 32-byte block-group descriptors, and `{inode, rec_len, name_len, file_type,
//! name[]}` directory entries padded to a 4-byte boundary.

use super::{Device, Inode, InodeNumber, InodeRef};
use crate::{bio, error::Errno};
use utils::{bytes, errno, lock::OnceInit};

pub const EXT2_ROOT_INO: InodeNumber = 2;
const EXT2_MAGIC: u16 = 0xEF53;

pub const S_IFMT: u16 = 0o170000;
pub const S_IFDIR: u16 = 0o040000;
pub const S_IFCHR: u16 = 0o020000;
pub const S_IFBLK: u16 = 0o060000;
pub const S_IFREG: u16 = 0o100000;
pub const S_IFLNK: u16 = 0o120000;

const FT_UNKNOWN: u8 = 0;
const FT_REG_FILE: u8 = 1;
const FT_DIR: u8 = 2;
const FT_CHRDEV: u8 = 3;
const FT_BLKDEV: u8 = 4;
const FT_SYMLINK: u8 = 7;

/// On-disk ext2 superblock. Only the leading revision-0 fields plus the revision-1 extension
/// used by this kernel are modeled; trailing reserved bytes pad the struct out to the true
/// on-disk size (1024 bytes) so block-count arithmetic (`size_of::<Superblock>() / BLOCK_SIZE`)
/// stays correct.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Superblock {
	pub s_inodes_count: u32,
	pub s_blocks_count: u32,
	pub s_r_blocks_count: u32,
	pub s_free_blocks_count: u32,
	pub s_free_inodes_count: u32,
	pub s_first_data_block: u32,
	pub s_log_block_size: u32,
	pub s_log_frag_size: i32,
	pub s_blocks_per_group: u32,
	pub s_frags_per_group: u32,
	pub s_inodes_per_group: u32,
	pub s_mtime: u32,
	pub s_wtime: u32,
	pub s_mnt_count: u16,
	pub s_max_mnt_count: i16,
	pub s_magic: u16,
	pub s_state: u16,
	pub s_errors: u16,
	pub s_minor_rev_level: u16,
	pub s_lastcheck: u32,
	pub s_checkinterval: u32,
	pub s_creator_os: u32,
	pub s_rev_level: u32,
	pub s_def_resuid: u16,
	pub s_def_resgid: u16,
	// -- EXT2_DYNAMIC_REV fields --
	pub s_first_ino: u32,
	pub s_inode_size: u16,
	pub s_block_group_nr: u16,
	pub s_feature_compat: u32,
	pub s_feature_incompat: u32,
	pub s_feature_ro_compat: u32,
	pub s_uuid: [u8; 16],
	pub s_volume_name: [u8; 16],
	pub s_last_mounted: [u8; 64],
	pub s_algo_bitmap: u32,
	_reserved: [u8; 1024 - 204],
}

const _: () = assert!(core::mem::size_of::<Superblock>() == 1024);

/// 32-byte on-disk block-group descriptor.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct BlockGroupDesc {
	pub bg_block_bitmap: u32,
	pub bg_inode_bitmap: u32,
	pub bg_inode_table: u32,
	pub bg_free_blocks_count: u16,
	pub bg_free_inodes_count: u16,
	pub bg_used_dirs_count: u16,
	pub bg_pad: u16,
	pub bg_reserved: [u8; 12],
}

const _: () = assert!(core::mem::size_of::<BlockGroupDesc>() == 32);

/// On-disk inode (128 bytes). With `s_inode_size` > 128 (256-byte inodes), the extra bytes at
/// the tail of each on-disk slot are simply never read or written by this struct's bit pattern.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct OnDiskInode {
	pub i_mode: u16,
	pub i_uid: u16,
	pub i_size: u32,
	pub i_atime: u32,
	pub i_ctime: u32,
	pub i_mtime: u32,
	pub i_dtime: u32,
	pub i_gid: u16,
	pub i_links_count: u16,
	pub i_blocks: u32,
	pub i_flags: u32,
	pub i_osd1: u32,
	pub i_block: [u32; 15],
	pub i_generation: u32,
	pub i_file_acl: u32,
	pub i_dir_acl: u32,
	pub i_faddr: u32,
	pub i_osd2: [u8; 12],
}

const _: () = assert!(core::mem::size_of::<OnDiskInode>() == 128);

impl Default for OnDiskInode {
	fn default() -> Self {
		// SAFETY: an all-zero bit pattern is valid for every field of this struct.
		unsafe { core::mem::zeroed() }
	}
}

/// Header of an on-disk directory entry; `name` follows immediately and is handled separately
/// since its length is dynamic.
#[repr(C)]
#[derive(Clone, Copy, Default)]
struct DirEntryHeader {
	inode: u32,
	rec_len: u16,
	name_len: u8,
	file_type: u8,
}

const DIRENT_HEADER_SIZE: usize = core::mem::size_of::<DirEntryHeader>();

fn round_up4(value: usize) -> usize {
	(value + 3) & !3
}

struct MountState {
	dev: Device,
	superblock: Superblock,
	block_size: u32,
	bios_per_block: u32,
	num_block_groups: u32,
}

static MOUNT: OnceInit<utils::lock::IntMutex<MountState>> = OnceInit::new();

fn with_mount<R>(f: impl FnOnce(&mut MountState) -> R) -> R {
	f(&mut MOUNT.get().lock())
}

fn read_blocks(dev: Device, block_nr: u64, buf: &mut [u8]) -> Result<(), Errno> {
	for (n, chunk) in buf.chunks_mut(bio::BLOCK_SIZE).enumerate() {
		let b = bio::read_block(dev, block_nr + n as u64)?;
		chunk.copy_from_slice(&b.data()[..chunk.len()]);
	}
	Ok(())
}

fn write_blocks(dev: Device, block_nr: u64, buf: &[u8]) -> Result<(), Errno> {
	for (n, chunk) in buf.chunks(bio::BLOCK_SIZE).enumerate() {
		let b = bio::read_block(dev, block_nr + n as u64)?;
		b.with_data_mut(|d| d[..chunk.len()].copy_from_slice(chunk));
		bio::write_block(&b);
	}
	Ok(())
}

fn block_group_bio_block_number(st: &MountState, bg_number: u32) -> u64 {
	let bg_size = core::mem::size_of::<BlockGroupDesc>() as u64;
	let mut block_nr = 1 + (bg_number as u64 * bg_size) / st.block_size as u64;
	block_nr += st.superblock.s_first_data_block as u64;
	block_nr *= st.bios_per_block as u64;
	block_nr += ((bg_number as u64 * bg_size) % st.block_size as u64) / bio::BLOCK_SIZE as u64;
	block_nr
}

fn read_block_group(st: &MountState, bg_number: u32) -> Result<BlockGroupDesc, Errno> {
	let bio_block = block_group_bio_block_number(st, bg_number);
	let buf = bio::read_block(st.dev, bio_block)?;
	let bg_size = core::mem::size_of::<BlockGroupDesc>();
	let offset = (bg_number as usize * bg_size) % bio::BLOCK_SIZE;
	Ok(buf.with_data(|d| unsafe { bytes::from_bytes(&d[offset..offset + bg_size]) }))
}

fn write_block_group(st: &MountState, bg_number: u32, bg: &BlockGroupDesc) -> Result<(), Errno> {
	let bio_block = block_group_bio_block_number(st, bg_number);
	let buf = bio::read_block(st.dev, bio_block)?;
	let bg_size = core::mem::size_of::<BlockGroupDesc>();
	let offset = (bg_number as usize * bg_size) % bio::BLOCK_SIZE;
	buf.with_data_mut(|d| unsafe {
		d[offset..offset + bg_size].copy_from_slice(bytes::as_bytes(bg));
	});
	bio::write_block(&buf);
	Ok(())
}

fn update_superblock(st: &MountState) -> Result<(), Errno> {
	// SAFETY: `Superblock` has no padding bytes meaningful to hide (trailing reserved bytes
	// are zeroed on mount and never read back as anything else).
	let raw = unsafe { bytes::as_bytes(&st.superblock) };
	write_blocks(st.dev, 2, raw)
}

fn read_inode_raw(st: &MountState, inum: InodeNumber) -> Result<OnDiskInode, Errno> {
	let index = inum - 1;
	let bgroup = index / st.superblock.s_inodes_per_group;
	let iindex = index % st.superblock.s_inodes_per_group;
	let bg = read_block_group(st, bgroup)?;
	let inode_size = st.superblock.s_inode_size as u64;
	let mut block_nr = bg.bg_inode_table as u64 + (iindex as u64 * inode_size) / st.block_size as u64;
	block_nr *= st.bios_per_block as u64;
	block_nr += ((iindex as u64 * inode_size) % st.block_size as u64) / bio::BLOCK_SIZE as u64;
	let buf = bio::read_block(st.dev, block_nr)?;
	let idx = ((iindex as u64 * inode_size) % bio::BLOCK_SIZE as u64) as usize;
	Ok(buf.with_data(|d| unsafe { bytes::from_bytes(&d[idx..idx + core::mem::size_of::<OnDiskInode>()]) }))
}

fn write_inode_raw(st: &MountState, inum: InodeNumber, disk: &OnDiskInode) -> Result<(), Errno> {
	let index = inum - 1;
	let bgroup = index / st.superblock.s_inodes_per_group;
	let iindex = index % st.superblock.s_inodes_per_group;
	let bg = read_block_group(st, bgroup)?;
	let inode_size = st.superblock.s_inode_size as u64;
	let mut block_nr = bg.bg_inode_table as u64 + (iindex as u64 * inode_size) / st.block_size as u64;
	block_nr *= st.bios_per_block as u64;
	block_nr += ((iindex as u64 * inode_size) % st.block_size as u64) / bio::BLOCK_SIZE as u64;
	let buf = bio::read_block(st.dev, block_nr)?;
	let idx = ((iindex as u64 * inode_size) % bio::BLOCK_SIZE as u64) as usize;
	buf.with_data_mut(|d| unsafe {
		d[idx..idx + core::mem::size_of::<OnDiskInode>()].copy_from_slice(bytes::as_bytes(disk));
	});
	bio::write_block(&buf);
	Ok(())
}

/// Reads `inum`'s on-disk inode image. Called by [`super::iget`] on a cache miss.
pub fn read_inode(dev: Device, inum: InodeNumber) -> Result<OnDiskInode, Errno> {
	with_mount(|st| {
		debug_assert_eq!(st.dev, dev);
		read_inode_raw(st, inum)
	})
}

/// Writes `inode`'s in-core image back to disk. Called by [`super::put_inode`] for a dirty
/// inode whose last reference is being dropped.
pub fn write_inode(inode: &Inode) -> Result<(), Errno> {
	with_mount(|st| write_inode_raw(st, inode.inum, &inode.disk))
}

trait BitmapStrategy {
	fn bitmap_block(bg: &BlockGroupDesc) -> u32;
	fn items_per_group(st: &MountState) -> u32;
	fn has_free(bg: &BlockGroupDesc) -> bool;
	fn decrement(bg: &mut BlockGroupDesc);
	fn increment(bg: &mut BlockGroupDesc);
}

struct InodeStrategy;

impl BitmapStrategy for InodeStrategy {
	fn bitmap_block(bg: &BlockGroupDesc) -> u32 {
		bg.bg_inode_bitmap
	}
	fn items_per_group(st: &MountState) -> u32 {
		st.superblock.s_inodes_per_group
	}
	fn has_free(bg: &BlockGroupDesc) -> bool {
		bg.bg_free_inodes_count > 0
	}
	fn decrement(bg: &mut BlockGroupDesc) {
		bg.bg_free_inodes_count -= 1;
	}
	fn increment(bg: &mut BlockGroupDesc) {
		bg.bg_free_inodes_count += 1;
	}
}

struct BlockStrategy;

impl BitmapStrategy for BlockStrategy {
	fn bitmap_block(bg: &BlockGroupDesc) -> u32 {
		bg.bg_block_bitmap
	}
	fn items_per_group(st: &MountState) -> u32 {
		st.superblock.s_blocks_per_group
	}
	fn has_free(bg: &BlockGroupDesc) -> bool {
		bg.bg_free_blocks_count > 0
	}
	fn decrement(bg: &mut BlockGroupDesc) {
		bg.bg_free_blocks_count -= 1;
	}
	fn increment(bg: &mut BlockGroupDesc) {
		bg.bg_free_blocks_count += 1;
	}
}

fn allocate_from_bitmap<S: BitmapStrategy>(
	st: &MountState,
	initial_bgroup: u32,
) -> Result<Option<u32>, Errno> {
	const BITS_PER_BLOCK: u32 = bio::BLOCK_SIZE as u32 * 8;
	let mut bgroup = initial_bgroup;
	loop {
		let mut bg = read_block_group(st, bgroup)?;
		if S::has_free(&bg) {
			let bitmap_first_block = S::bitmap_block(&bg) as u64 * st.bios_per_block as u64;
			for item_index in 0..S::items_per_group(st) {
				let buf = bio::read_block(
					st.dev,
					bitmap_first_block + (item_index / BITS_PER_BLOCK) as u64,
				)?;
				let byte_index = ((item_index % BITS_PER_BLOCK) / 8) as usize;
				let bit = 1u8 << (item_index % 8);
				let is_set = buf.with_data(|d| d[byte_index] & bit != 0);
				if !is_set {
					buf.with_data_mut(|d| d[byte_index] |= bit);
					bio::write_block(&buf);
					S::decrement(&mut bg);
					write_block_group(st, bgroup, &bg)?;
					return Ok(Some(bgroup * S::items_per_group(st) + item_index));
				}
			}
		}
		bgroup = (bgroup + 1) % st.num_block_groups;
		if bgroup == initial_bgroup {
			return Ok(None);
		}
	}
}

fn free_from_bitmap<S: BitmapStrategy>(
	st: &MountState,
	bgroup: u32,
	item_index: u32,
) -> Result<bool, Errno> {
	const BITS_PER_BLOCK: u32 = bio::BLOCK_SIZE as u32 * 8;
	let mut bg = read_block_group(st, bgroup)?;
	let bitmap_first_block = S::bitmap_block(&bg) as u64 * st.bios_per_block as u64;
	let buf = bio::read_block(
		st.dev,
		bitmap_first_block + (item_index / BITS_PER_BLOCK) as u64,
	)?;
	let byte_index = ((item_index % BITS_PER_BLOCK) / 8) as usize;
	let bit = 1u8 << (item_index % 8);
	let was_set = buf.with_data(|d| d[byte_index] & bit != 0);
	if !was_set {
		return Ok(false);
	}
	buf.with_data_mut(|d| d[byte_index] &= !bit);
	bio::write_block(&buf);
	S::increment(&mut bg);
	write_block_group(st, bgroup, &bg)?;
	Ok(true)
}

/// Allocates a fresh inode number, starting the search at the block group owning `dir_inum`
/// (the directory the new inode will be linked into), wrapping across groups.
fn allocate_inode(dir_inum: InodeNumber) -> Result<Option<InodeNumber>, Errno> {
	with_mount(|st| {
		let initial_bgroup = (dir_inum - 1) / st.superblock.s_inodes_per_group;
		let Some(index) = allocate_from_bitmap::<InodeStrategy>(st, initial_bgroup)? else {
			return Ok(None);
		};
		st.superblock.s_free_inodes_count -= 1;
		update_superblock(st)?;
		Ok(Some(index + 1))
	})
}

/// Allocates a fresh data block, starting the search at the block group owning `inode`.
///
/// Starting from the *owning inode's* group rather than the directory's or a rotor cursor is
/// simple and correct but not locality-optimal for large files added to over time; see the
/// design notes for why this is accepted as-is rather than reworked.
fn allocate_block(inum: InodeNumber) -> Result<Option<u32>, Errno> {
	with_mount(|st| {
		let initial_bgroup = (inum - 1) / st.superblock.s_inodes_per_group;
		let Some(block) = allocate_from_bitmap::<BlockStrategy>(st, initial_bgroup)? else {
			return Ok(None);
		};
		st.superblock.s_free_blocks_count -= 1;
		update_superblock(st)?;
		Ok(Some(block))
	})
}

fn free_data_block(block_nr: u32) -> Result<bool, Errno> {
	with_mount(|st| {
		let bgroup = block_nr / st.superblock.s_blocks_per_group;
		let index = block_nr % st.superblock.s_blocks_per_group;
		if !free_from_bitmap::<BlockStrategy>(st, bgroup, index)? {
			return Ok(false);
		}
		st.superblock.s_free_blocks_count += 1;
		update_superblock(st)?;
		Ok(true)
	})
}

fn traverse_block_pointers(dev: Device, block_nr: u32, mut f: impl FnMut(u32)) -> Result<(), Errno> {
	let (block_size, bios_per_block) = with_mount(|st| (st.block_size, st.bios_per_block));
	let pointers_per_block = block_size / 4;
	let pointers_per_bio_block = (bio::BLOCK_SIZE / 4) as u32;
	for n in 0..pointers_per_block {
		let bio_block_nr = block_nr as u64 * bios_per_block as u64 + (n / pointers_per_bio_block) as u64;
		let offset = ((n % pointers_per_bio_block) * 4) as usize;
		let buf = bio::read_block(dev, bio_block_nr)?;
		let ptr = buf.with_data(|d| u32::from_ne_bytes(d[offset..offset + 4].try_into().unwrap()));
		f(ptr);
	}
	Ok(())
}

fn free_data_blocks(inode: &Inode) -> Result<(), Errno> {
	let free_if_used = |block_nr: u32| -> Result<(), Errno> {
		if block_nr != 0 {
			free_data_block(block_nr)?;
		}
		Ok(())
	};
	for &b in &inode.disk.i_block[0..12] {
		free_if_used(b)?;
	}
	let singly = inode.disk.i_block[12];
	if singly != 0 {
		let mut err = None;
		traverse_block_pointers(inode.dev, singly, |b| {
			if err.is_none() {
				err = free_if_used(b).err();
			}
		})?;
		if let Some(e) = err {
			return Err(e);
		}
		free_if_used(singly)?;
	}
	let doubly = inode.disk.i_block[13];
	if doubly != 0 {
		let mut err = None;
		traverse_block_pointers(inode.dev, doubly, |indirect| {
			if indirect == 0 || err.is_some() {
				return;
			}
			let res = traverse_block_pointers(inode.dev, indirect, |b| {
				if err.is_none() {
					err = free_if_used(b).err();
				}
			})
			.and_then(|_| free_if_used(indirect));
			if let Err(e) = res {
				err = Some(e);
			}
		})?;
		if let Some(e) = err {
			return Err(e);
		}
		free_if_used(doubly)?;
	}
	let triply = inode.disk.i_block[14];
	if triply != 0 {
		let mut err = None;
		traverse_block_pointers(inode.dev, triply, |first| {
			if first == 0 || err.is_some() {
				return;
			}
			let res = traverse_block_pointers(inode.dev, first, |second| {
				if second == 0 || err.is_some() {
					return;
				}
				let res = traverse_block_pointers(inode.dev, second, |b| {
					if err.is_none() {
						err = free_if_used(b).err();
					}
				})
				.and_then(|_| free_if_used(second));
				if let Err(e) = res {
					err = Some(e);
				}
			})
			.and_then(|_| free_if_used(first));
			if let Err(e) = res {
				err = Some(e);
			}
		})?;
		if let Some(e) = err {
			return Err(e);
		}
		free_if_used(triply)?;
	}
	Ok(())
}

/// Releases `inum`'s inode-bitmap bit and clears its on-disk image.
///
/// Takes the raw number rather than an [`InodeRef`] so it can be called to undo a just-created
/// inode whose directory entry insertion failed, before the new inode is ever handed back to a
/// caller as a live reference (see [`create_directory_entry`]).
fn deallocate_inode(dev: Device, inum: InodeNumber) -> Result<(), Errno> {
	with_mount(|st| {
		let bgroup = (inum - 1) / st.superblock.s_inodes_per_group;
		let index = (inum - 1) % st.superblock.s_inodes_per_group;
		if !free_from_bitmap::<InodeStrategy>(st, bgroup, index)? {
			return Ok(());
		}
		st.superblock.s_free_inodes_count += 1;
		update_superblock(st)?;
		write_inode_raw(st, inum, &OnDiskInode::default())?;
		debug_assert_eq!(dev, st.dev);
		Ok(())
	})
}

/// Frees an inode's data blocks, bitmap bit, and on-disk image. The inode must already have a
/// zero link count.
pub fn free_inode(inode: InodeRef) -> Result<(), Errno> {
	free_data_blocks(&inode)?;
	deallocate_inode(inode.dev, inode.inum)
}

fn determine_indirect(disk: &OnDiskInode, mut logical: u32) -> (u32, usize, u32) {
	let pointers_per_block = with_mount(|st| st.block_size / 4);
	logical -= 12;
	if logical < pointers_per_block {
		return (0, 12, logical);
	}
	logical -= pointers_per_block;
	if logical < pointers_per_block * pointers_per_block {
		return (1, 13, logical);
	}
	logical -= pointers_per_block * pointers_per_block;
	(2, 14, logical)
}

/// Ensures `*slot` names an allocated block, allocating and zero-filling a new one if it is
/// zero and `create` is set. `owner` receives the allocation side effects (i_blocks bump,
/// dirty flag); `containing_buf`, if present, is the BIO buffer `slot` lives in and is marked
/// dirty too.
fn ensure_block(
	owner: &mut Inode,
	slot: &mut u32,
	containing_buf: Option<&bio::BufferRef>,
	create: bool,
) -> Result<bool, Errno> {
	if *slot != 0 {
		return Ok(true);
	}
	if !create {
		return Ok(false);
	}
	let Some(new_block) = allocate_block(owner.inum)? else {
		return Ok(false);
	};
	*slot = new_block;
	owner.disk.i_blocks += 1;
	owner.dirty = true;
	if let Some(buf) = containing_buf {
		bio::write_block(buf);
	}
	let bios_per_block = with_mount(|st| st.bios_per_block);
	for n in 0..bios_per_block {
		let buf = bio::read_block(owner.dev, new_block as u64 * bios_per_block as u64 + n as u64)?;
		buf.with_data_mut(|d| d.fill(0));
		bio::write_block(&buf);
	}
	Ok(true)
}

/// Translates a logical (file-relative) block index to a BIO block number, optionally
/// allocating any unmapped direct/indirect block along the way.
pub fn bmap(inode: &mut Inode, logical_block_nr: u32, create: bool) -> Result<Option<u64>, Errno> {
	let bios_per_block = with_mount(|st| st.bios_per_block);
	let ext2_block_nr = logical_block_nr / bios_per_block;
	let bio_offset = logical_block_nr % bios_per_block;

	if ext2_block_nr < 12 {
		let mut slot = inode.disk.i_block[ext2_block_nr as usize];
		if !ensure_block(inode, &mut slot, None, create)? {
			return Ok(None);
		}
		inode.disk.i_block[ext2_block_nr as usize] = slot;
		return Ok(Some(slot as u64 * bios_per_block as u64 + bio_offset as u64));
	}

	let (level, i_block_index, mut rest) = determine_indirect(&inode.disk, ext2_block_nr);
	let mut indirect_slot = inode.disk.i_block[i_block_index];
	if !ensure_block(inode, &mut indirect_slot, None, create)? {
		return Ok(None);
	}
	inode.disk.i_block[i_block_index] = indirect_slot;
	let mut indirect = indirect_slot;
	let block_size = with_mount(|st| st.block_size);
	let pointers_per_block = block_size / 4;

	let mut remaining_level = level;
	loop {
		let block_index = (rest / pointers_per_block.pow(remaining_level)) % pointers_per_block;
		rest %= pointers_per_block.pow(remaining_level);
		let mut bio_block_nr = indirect as u64 * bios_per_block as u64;
		let pointers_per_bio_block = (bio::BLOCK_SIZE / 4) as u32;
		let mut block_index_in_bio = block_index;
		bio_block_nr += (block_index_in_bio / pointers_per_bio_block) as u64;
		block_index_in_bio %= pointers_per_bio_block;
		let buf = bio::read_block(inode.dev, bio_block_nr)?;
		let offset = (block_index_in_bio * 4) as usize;
		let mut ptr = buf.with_data(|d| u32::from_ne_bytes(d[offset..offset + 4].try_into().unwrap()));
		if !ensure_block(inode, &mut ptr, Some(&buf), create)? {
			return Ok(None);
		}
		buf.with_data_mut(|d| d[offset..offset + 4].copy_from_slice(&ptr.to_ne_bytes()));
		indirect = ptr;
		if remaining_level == 0 {
			break;
		}
		remaining_level -= 1;
	}
	Ok(Some(indirect as u64 * bios_per_block as u64 + bio_offset as u64))
}

/// A single resolved directory entry, handed back to [`super::lookup_in_directory`].
pub struct DirEntry {
	pub inode: InodeNumber,
	pub file_type: u8,
	pub name: utils::collections::string::String,
}

/// Reads the next valid directory entry at or after `offset`, skipping deleted (`inode == 0`)
/// and corrupt (`name_len` too large) records. Returns the entry and the offset to resume from.
pub fn read_directory(
	dir_inode: &mut Inode,
	mut offset: u64,
) -> Result<Option<(DirEntry, u64)>, Errno> {
	while offset < dir_inode.disk.i_size as u64 {
		let mut raw = [0u8; DIRENT_HEADER_SIZE + utils::limits::NAME_MAX];
		let n = super::read(dir_inode, &mut raw, offset)?;
		if n < DIRENT_HEADER_SIZE {
			return Ok(None);
		}
		let header: DirEntryHeader = unsafe { bytes::from_bytes(&raw[..DIRENT_HEADER_SIZE]) };
		if header.rec_len == 0 {
			return Ok(None);
		}
		if header.name_len as usize >= utils::limits::NAME_MAX || header.inode == 0 {
			offset += header.rec_len as u64;
			continue;
		}
		let name_bytes = &raw[DIRENT_HEADER_SIZE..DIRENT_HEADER_SIZE + header.name_len as usize];
		let name = alloc::format!("{}", utils::display::DisplayableStr(name_bytes));
		offset += header.rec_len as u64;
		return Ok(Some((
			DirEntry {
				inode: header.inode,
				file_type: header.file_type,
				name,
			},
			offset,
		)));
	}
	Ok(None)
}

fn write_directory_entry(
	dir_inode: &mut Inode,
	offset: u64,
	inum: InodeNumber,
	rec_len: u16,
	file_type: u8,
	name: &[u8],
) -> Result<(), Errno> {
	let mut raw = [0u8; DIRENT_HEADER_SIZE + utils::limits::NAME_MAX];
	let header = DirEntryHeader {
		inode: inum,
		rec_len,
		name_len: name.len() as u8,
		file_type,
	};
	raw[..DIRENT_HEADER_SIZE].copy_from_slice(unsafe { bytes::as_bytes(&header) });
	raw[DIRENT_HEADER_SIZE..DIRENT_HEADER_SIZE + name.len()].copy_from_slice(name);
	let entry_len = DIRENT_HEADER_SIZE + name.len();
	super::write_exact(dir_inode, &raw[..entry_len], offset)
}

/// Scans `dir_inode` for a record whose slack can hold a new `name`/`inum` entry, splitting
/// that record in place, or appends a new block-sized record at the end.
pub fn add_entry_to_directory(
	dir_inode: &mut Inode,
	inum: InodeNumber,
	file_type: u8,
	name: &str,
) -> Result<(), Errno> {
	let block_size = with_mount(|st| st.block_size);
	let new_entry_len = round_up4(DIRENT_HEADER_SIZE + name.len()) as u16;
	let mut offset = 0u64;
	while offset < dir_inode.disk.i_size as u64 {
		let mut raw = [0u8; DIRENT_HEADER_SIZE];
		super::read_exact(dir_inode, &mut raw, offset)?;
		let mut header: DirEntryHeader = unsafe { bytes::from_bytes(&raw) };
		let current_len = if header.inode != 0 {
			round_up4(DIRENT_HEADER_SIZE + header.name_len as usize) as u16
		} else {
			0
		};
		if header.rec_len.saturating_sub(current_len) < new_entry_len {
			offset += header.rec_len as u64;
			continue;
		}
		let new_rec_len = header.rec_len - current_len;
		let mut write_offset = offset;
		if current_len > 0 {
			header.rec_len = current_len;
			raw.copy_from_slice(unsafe { bytes::as_bytes(&header) });
			super::write_exact(dir_inode, &raw, offset)?;
			write_offset += current_len as u64;
		}
		return write_directory_entry(
			dir_inode,
			write_offset,
			inum,
			new_rec_len,
			file_type,
			name.as_bytes(),
		);
	}
	write_directory_entry(dir_inode, offset, inum, block_size as u16, file_type, name.as_bytes())
}

/// Removes `name`'s record, merging its space into the previous record in the same block if
/// there is one, else zeroing the record's inode number in place.
pub fn remove_entry_from_directory(dir_inode: &mut Inode, name: &str) -> Result<(), Errno> {
	let name_bytes = name.as_bytes();
	let mut offset = 0u64;
	let mut prev_offset = 0u64;
	let mut prev: Option<DirEntryHeader> = None;
	while offset < dir_inode.disk.i_size as u64 {
		let mut raw = [0u8; DIRENT_HEADER_SIZE];
		super::read_exact(dir_inode, &mut raw, offset)?;
		let header: DirEntryHeader = unsafe { bytes::from_bytes(&raw) };
		let mut component = [0u8; utils::limits::NAME_MAX];
		super::read_exact(
			dir_inode,
			&mut component[..header.name_len as usize],
			offset + DIRENT_HEADER_SIZE as u64,
		)?;
		if header.name_len as usize != name_bytes.len()
			|| &component[..header.name_len as usize] != name_bytes
		{
			prev_offset = offset;
			prev = Some(header);
			offset += header.rec_len as u64;
			continue;
		}
		if let Some(mut p) = prev {
			p.rec_len += header.rec_len;
			let raw = unsafe { bytes::as_bytes(&p) };
			super::write(dir_inode, raw, prev_offset)?;
			return Ok(());
		}
		let mut cleared = header;
		cleared.inode = 0;
		let raw = unsafe { bytes::as_bytes(&cleared) };
		super::write(dir_inode, raw, offset)?;
		return Ok(());
	}
	Err(errno!(ENOENT))
}

/// Allocates an inode, links it under `name` in `parent`, and returns it live. If inserting the
/// directory entry fails (directory full, I/O error), the freshly-allocated inode is freed
/// again before the error is returned, so a failed create never leaks an inode.
pub fn create_directory_entry(
	parent: &mut Inode,
	mode: u16,
	file_type: u8,
	name: &str,
) -> Result<InodeRef, Errno> {
	let Some(inum) = allocate_inode(parent.inum)? else {
		return Err(errno!(ENOSPC));
	};
	let mut new_inode = super::iget(parent.dev, inum)?;
	new_inode.disk = OnDiskInode {
		i_mode: mode,
		i_links_count: 1,
		..Default::default()
	};
	new_inode.dirty = true;
	if let Err(e) = add_entry_to_directory(parent, inum, file_type, name) {
		drop(new_inode);
		// Safe to deallocate directly: nothing else can have observed this inode number yet.
		let _ = deallocate_inode(parent.dev, inum);
		return Err(e);
	}
	Ok(new_inode)
}

pub fn create_regular(parent: &mut Inode, name: &str, mode: u16) -> Result<InodeRef, Errno> {
	create_directory_entry(parent, S_IFREG | mode, FT_REG_FILE, name)
}

pub fn create_directory(parent: &mut Inode, name: &str, mode: u16) -> Result<(), Errno> {
	let mut new_inode = create_directory_entry(parent, S_IFDIR | mode, FT_DIR, name)?;
	new_inode.disk.i_links_count = 2; // "." and the entry in the parent
	let block_size = with_mount(|st| st.block_size);
	write_directory_entry(&mut new_inode, 0, 0, block_size as u16, FT_UNKNOWN, b"")?;
	new_inode.disk.i_size = block_size;
	new_inode.dirty = true;

	let undo = |inode: InodeRef, inum: InodeNumber| {
		drop(inode);
		let _ = deallocate_inode(parent.dev, inum);
	};
	let new_inum = new_inode.inum;
	if let Err(e) = add_entry_to_directory(&mut new_inode, new_inum, FT_DIR, ".") {
		undo(new_inode, new_inum);
		return Err(e);
	}
	if let Err(e) = add_entry_to_directory(&mut new_inode, parent.inum, FT_DIR, "..") {
		undo(new_inode, new_inum);
		return Err(e);
	}
	parent.disk.i_links_count += 1;
	parent.dirty = true;

	with_mount(|st| -> Result<(), Errno> {
		let bgroup = (new_inum - 1) / st.superblock.s_inodes_per_group;
		let mut bg = read_block_group(st, bgroup)?;
		bg.bg_used_dirs_count += 1;
		write_block_group(st, bgroup, &bg)
	})
}

pub fn create_symlink(parent: &mut Inode, name: &str, target: &str) -> Result<InodeRef, Errno> {
	let mut new_inode = create_directory_entry(parent, S_IFLNK | 0o777, FT_SYMLINK, name)?;
	super::write_exact(&mut new_inode, target.as_bytes(), 0)?;
	new_inode.disk.i_size = target.len() as u32;
	new_inode.dirty = true;
	Ok(new_inode)
}

pub fn create_special(parent: &mut Inode, name: &str, mode: u16, dev: u16) -> Result<InodeRef, Errno> {
	let file_type = match mode & S_IFMT {
		S_IFBLK => FT_BLKDEV,
		S_IFCHR => FT_CHRDEV,
		_ => return Err(errno!(EINVAL)),
	};
	let mut new_inode = create_directory_entry(parent, mode, file_type, name)?;
	new_inode.disk.i_block[0] = dev as u32;
	new_inode.dirty = true;
	Ok(new_inode)
}

pub fn create_link(parent: &mut Inode, source: &mut Inode, name: &str) -> Result<(), Errno> {
	add_entry_to_directory(parent, source.inum, FT_REG_FILE, name)?;
	source.disk.i_links_count += 1;
	source.dirty = true;
	Ok(())
}

/// Decrements `inode`'s link count, freeing its blocks and bitmap slot once it reaches zero.
pub fn unlink_inode(mut inode: InodeRef) -> Result<(), Errno> {
	inode.disk.i_links_count -= 1;
	if inode.disk.i_links_count > 0 {
		inode.dirty = true;
		return Ok(());
	}
	free_inode(inode)
}

/// Truncates `inode` to zero length, releasing every data block it owned.
pub fn truncate(inode: &mut Inode) -> Result<(), Errno> {
	inode.disk.i_size = 0;
	inode.dirty = true;
	free_data_blocks(inode)?;
	inode.disk.i_block = [0; 15];
	Ok(())
}

/// Removes `".."`/`"."` from a now-empty directory, frees it, and drops the parent's extra
/// link count — the counterpart of [`create_directory`].
pub fn remove_directory(parent: &mut Inode, mut inode: InodeRef) -> Result<(), Errno> {
	remove_entry_from_directory(&mut inode, "..")?;
	remove_entry_from_directory(&mut inode, ".")?;
	with_mount(|st| -> Result<(), Errno> {
		let bgroup = (inode.inum - 1) / st.superblock.s_inodes_per_group;
		let mut bg = read_block_group(st, bgroup)?;
		bg.bg_used_dirs_count -= 1;
		write_block_group(st, bgroup, &bg)
	})?;
	free_data_blocks(&inode)?;
	deallocate_inode(inode.dev, inode.inum)?;
	core::mem::forget(inode); // already freed above; don't let Drop double-iput a dead slot
	parent.disk.i_links_count -= 1;
	parent.dirty = true;
	Ok(())
}

/// Reads the superblock off `dev`, validates its magic, and returns the root inode (inum 2).
pub fn mount(dev: Device) -> Result<InodeRef, Errno> {
	let mut raw = [0u8; 1024];
	read_blocks(dev, 2, &mut raw)?;
	let superblock: Superblock = unsafe { bytes::from_bytes(&raw) };
	if superblock.s_magic != EXT2_MAGIC {
		return Err(errno!(EINVAL));
	}
	let block_size = 1024u32 << superblock.s_log_block_size;
	let bios_per_block = block_size / bio::BLOCK_SIZE as u32;
	let num_block_groups =
		(superblock.s_blocks_count - superblock.s_first_data_block) / superblock.s_blocks_per_group;
	MOUNT.init(utils::lock::IntMutex::new(MountState {
		dev,
		superblock,
		block_size,
		bios_per_block,
		num_block_groups,
	}));
	super::iget(dev, EXT2_ROOT_INO)
}

/// A snapshot of the mounted filesystem's capacity, for `statfs`/`fstatfs`.
pub struct FsStats {
	pub block_size: u32,
	pub blocks_total: u32,
	pub blocks_free: u32,
	pub inodes_total: u32,
	pub inodes_free: u32,
	pub name_max: u32,
}

pub fn stats() -> FsStats {
	with_mount(|st| FsStats {
		block_size: st.block_size,
		blocks_total: st.superblock.s_blocks_count,
		blocks_free: st.superblock.s_free_blocks_count,
		inodes_total: st.superblock.s_inodes_count,
		inodes_free: st.superblock.s_free_inodes_count,
		name_max: utils::limits::NAME_MAX as u32,
	})
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::device::BlockDevice;
	use alloc::{string::String, vec::Vec};
	use utils::lock::IntMutex;

	/// A hand-built 32-block (1 KiB/block) ext2 revision-1 image with a single block group:
	/// block 0 boot, block 1 superblock, block 2 the block-group descriptor table, block 3 the
	/// block bitmap, block 4 the inode bitmap, blocks 5-8 a 32-entry/128-byte inode table, and
	/// blocks 9-30 free for the root directory and test files to claim. Bit `i` of each bitmap
	/// names block/inode number `i` directly (this kernel's allocator never offsets by
	/// `s_first_data_block`, see [`allocate_from_bitmap`]), so the first 9 block bits and the
	/// first 2 inode bits are pre-marked used for the metadata above and the reserved/root
	/// inodes.
	const TEST_BLOCK_SIZE: usize = 1024;
	const TEST_BLOCKS: usize = 32;
	const TEST_SECTORS: usize = TEST_BLOCKS * TEST_BLOCK_SIZE / bio::BLOCK_SIZE;

	struct MemDisk {
		data: IntMutex<[[u8; bio::BLOCK_SIZE]; TEST_SECTORS]>,
	}

	impl BlockDevice for MemDisk {
		fn read_sectors(&self, lba: u64, buf: &mut [u8]) -> Result<(), Errno> {
			buf.copy_from_slice(&self.data.lock()[lba as usize]);
			Ok(())
		}

		fn write_sectors(&self, lba: u64, buf: &[u8]) -> Result<(), Errno> {
			self.data.lock()[lba as usize].copy_from_slice(buf);
			Ok(())
		}
	}

	impl MemDisk {
		fn write_at(&self, ext2_block: usize, byte_offset: usize, bytes: &[u8]) {
			let mut data = self.data.lock();
			let abs = ext2_block * TEST_BLOCK_SIZE + byte_offset;
			for (i, &b) in bytes.iter().enumerate() {
				let pos = abs + i;
				data[pos / bio::BLOCK_SIZE][pos % bio::BLOCK_SIZE] = b;
			}
		}
	}

	static DISK: MemDisk = MemDisk {
		data: IntMutex::new([[0; bio::BLOCK_SIZE]; TEST_SECTORS]),
	};

	/// Builds the on-disk image described on [`DISK`] and mounts it, returning the live root
	/// inode with its `.`/`..` entries already inserted the way [`create_directory`] bootstraps
	/// every other directory (the root has no parent to do this on its behalf).
	fn mount_test_image(dev: Device) -> InodeRef {
		let superblock = Superblock {
			s_inodes_count: 32,
			s_blocks_count: TEST_BLOCKS as u32,
			s_r_blocks_count: 0,
			s_free_blocks_count: 22,
			s_free_inodes_count: 30,
			s_first_data_block: 1,
			s_log_block_size: 0,
			s_log_frag_size: 0,
			s_blocks_per_group: 31,
			s_frags_per_group: 31,
			s_inodes_per_group: 32,
			s_mtime: 0,
			s_wtime: 0,
			s_mnt_count: 0,
			s_max_mnt_count: -1,
			s_magic: EXT2_MAGIC,
			s_state: 1,
			s_errors: 1,
			s_minor_rev_level: 0,
			s_lastcheck: 0,
			s_checkinterval: 0,
			s_creator_os: 0,
			s_rev_level: 1,
			s_def_resuid: 0,
			s_def_resgid: 0,
			s_first_ino: 11,
			s_inode_size: 128,
			s_block_group_nr: 0,
			s_feature_compat: 0,
			s_feature_incompat: 0,
			s_feature_ro_compat: 0,
			s_uuid: [0; 16],
			s_volume_name: [0; 16],
			s_last_mounted: [0; 64],
			s_algo_bitmap: 0,
			_reserved: [0; 1024 - 204],
		};
		DISK.write_at(1, 0, unsafe { bytes::as_bytes(&superblock) });

		let bg = BlockGroupDesc {
			bg_block_bitmap: 3,
			bg_inode_bitmap: 4,
			bg_inode_table: 5,
			bg_free_blocks_count: 22,
			bg_free_inodes_count: 30,
			bg_used_dirs_count: 0,
			bg_pad: 0,
			bg_reserved: [0; 12],
		};
		DISK.write_at(2, 0, unsafe { bytes::as_bytes(&bg) });

		// Blocks 0..8 (metadata) used; 9..30 free.
		DISK.write_at(3, 0, &[0xff]);
		DISK.write_at(3, 1, &[0x01]);
		// Inodes 1 (reserved) and 2 (root) used; 3..32 free.
		DISK.write_at(4, 0, &[0x03]);

		let root_disk = OnDiskInode {
			i_mode: S_IFDIR | 0o755,
			i_links_count: 2,
			..Default::default()
		};
		// inum 2 -> index 1 -> offset 128 within the inode table's first 512-byte BIO block.
		DISK.write_at(5, 128, unsafe { bytes::as_bytes(&root_disk) });

		bio::init();
		bio::register_device(dev, &DISK, 0);
		let mut root = mount(dev).expect("mount of hand-built image");

		let block_size = with_mount(|st| st.block_size);
		write_directory_entry(&mut root, 0, 0, block_size as u16, FT_UNKNOWN, b"")
			.expect("allocate root directory block");
		root.disk.i_size = block_size;
		root.dirty = true;
		add_entry_to_directory(&mut root, EXT2_ROOT_INO, FT_DIR, ".").expect("insert .");
		add_entry_to_directory(&mut root, EXT2_ROOT_INO, FT_DIR, "..").expect("insert ..");
		root
	}

	fn directory_names(dir: &mut Inode) -> Vec<String> {
		let mut names = Vec::new();
		let mut offset = 0u64;
		while let Some((entry, next)) = read_directory(dir, offset).unwrap() {
			names.push(entry.name);
			offset = next;
		}
		names
	}

	/// Exercises bmap determinism, directory add/remove round-tripping, allocation accounting,
	/// and `namei` idempotence against one mounted image. These share the module's `MOUNT`/
	/// `fs::ROOT` singletons, which may only be initialized once per process, so they all live
	/// in a single test rather than one `#[test]` per property.
	#[test]
	fn ext2_engine_end_to_end() {
		let mut root = mount_test_image(7);
		crate::fs::ROOT.init(root.clone());
		assert!(root.is_dir());
		assert_eq!(root.disk.i_mode & S_IFMT, S_IFDIR);

		let free_inodes_before_create = with_mount(|st| st.superblock.s_free_inodes_count);
		let mut file1 = create_regular(&mut root, "file1.txt", 0o644).expect("create file1.txt");
		assert_eq!(
			with_mount(|st| st.superblock.s_free_inodes_count),
			free_inodes_before_create - 1,
			"allocating one inode must decrement the free-inode count by exactly 1"
		);
		let free_blocks_before_write = with_mount(|st| st.superblock.s_free_blocks_count);

		// 2600 bytes span three 1024-byte direct blocks (i_block[0..2]).
		let mut pattern = [0u8; 2600];
		for (i, b) in pattern.iter_mut().enumerate() {
			*b = i as u8;
		}
		crate::fs::write(&mut file1, &pattern, 0).expect("write spanning blocks");
		assert_eq!(
			with_mount(|st| st.superblock.s_free_blocks_count),
			free_blocks_before_write - 3,
			"a 2600-byte write over 1024-byte blocks must allocate exactly 3 data blocks"
		);

		// bmap determinism: direct blocks resolve to the same device block on every call, and
		// distinct logical blocks resolve to distinct device blocks.
		let b0 = bmap(&mut file1, 0, false).unwrap().unwrap();
		let b1 = bmap(&mut file1, 1, false).unwrap().unwrap();
		let b2 = bmap(&mut file1, 2, false).unwrap().unwrap();
		assert_eq!(bmap(&mut file1, 0, false).unwrap().unwrap(), b0);
		assert_ne!(b0, b1);
		assert_ne!(b1, b2);

		let mut readback = [0u8; 2600];
		let n = crate::fs::read(&mut file1, &mut readback, 0).unwrap();
		assert_eq!(n, 2600);
		assert_eq!(readback, pattern);
		assert_eq!(crate::fs::read(&mut file1, &mut [0u8; 1], 2600).unwrap(), 0, "read at EOF is short");

		create_regular(&mut root, "a", 0o644).unwrap();
		create_regular(&mut root, "b", 0o644).unwrap();
		create_regular(&mut root, "c", 0o644).unwrap();

		let mut names = directory_names(&mut root);
		names.sort();
		assert_eq!(names, [".", "..", "a", "b", "c", "file1.txt"]);

		remove_entry_from_directory(&mut root, "b").expect("remove b");
		let mut names = directory_names(&mut root);
		names.sort();
		assert_eq!(
			names,
			[".", "..", "a", "c", "file1.txt"],
			"removing one entry must leave exactly the remaining names"
		);

		// namei idempotence: resolving the same path twice yields the same inode number, and
		// `stat` agrees with it.
		let first = crate::fs::namei("/file1.txt", &root, true).unwrap();
		let second = crate::fs::namei("/file1.txt", &root, true).unwrap();
		assert_eq!(first.inum, second.inum);
		assert_eq!(crate::fs::stat(&first).st_ino, second.inum as u64);

		assert!(crate::fs::namei("/nope", &root, true).is_err());
	}
}
