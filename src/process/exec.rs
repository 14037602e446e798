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

//! ELF64 program loading for `execve`.
//!
//! `argv`/`envp` arrive already copied out of the caller's user memory into owned byte strings
//! (the syscall layer does that copy through `UserPtr` while the *old* address space is still
//! current); by the time [`exec`] runs, nothing here still depends on a particular address
//! space being mapped, which sidesteps the ordering hazard of needing to read user strings
//! after the mappings that back them have already been torn down.

use crate::{
	error::Errno,
	fs,
	memory::{
		buddy, page_round_down, page_round_up,
		vmspace::{flags, InodeSource, Mapping, VMSpace},
		PAGE_SIZE,
	},
};
use alloc::vec::Vec;
use utils::{bytes, errno};

const EI_MAG: [u8; 4] = *b"\x7fELF";
const ELFCLASS64: u8 = 2;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_X86_64: u16 = 62;
const PT_LOAD: u32 = 1;
const PF_X: u32 = 1;
const PF_W: u32 = 2;

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct Elf64Header {
	e_ident: [u8; 16],
	e_type: u16,
	e_machine: u16,
	e_version: u32,
	e_entry: u64,
	e_phoff: u64,
	e_shoff: u64,
	e_flags: u32,
	e_ehsize: u16,
	e_phentsize: u16,
	e_phnum: u16,
	e_shentsize: u16,
	e_shnum: u16,
	e_shstrndx: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct ProgramHeader {
	p_type: u32,
	p_flags: u32,
	p_offset: u64,
	p_vaddr: u64,
	p_paddr: u64,
	p_filesz: u64,
	p_memsz: u64,
	p_align: u64,
}

const _: () = assert!(core::mem::size_of::<Elf64Header>() == 64);
const _: () = assert!(core::mem::size_of::<ProgramHeader>() == 56);

/// Top of the userland stack, with a fixed number of pages below it reserved for argv/envp and
/// their string data.
const USER_STACK_TOP: usize = 0x0000_7fff_ffff_f000;
const USER_STACK_PAGES: usize = 4;

/// Result of a successful load: the new address space and where to resume userland execution.
pub struct Loaded {
	pub vmspace: VMSpace,
	pub entry: usize,
	pub stack_pointer: usize,
}

/// Loads the ELF64 executable named by `path`, building a fresh [`VMSpace`] with one
/// file-backed [`Mapping`] per `PT_LOAD` segment plus a populated argv/envp stack.
pub fn exec(path: &str, cwd: &fs::InodeRef, argv: &[Vec<u8>], envp: &[Vec<u8>]) -> Result<Loaded, Errno> {
	let mut inode = fs::namei(path, cwd, true)?;
	if !inode.is_regular() {
		return Err(errno!(EACCES));
	}
	let mut header_buf = [0u8; core::mem::size_of::<Elf64Header>()];
	fs::read_exact(&mut inode, &mut header_buf, 0)?;
	let header: Elf64Header = unsafe { bytes::from_bytes(&header_buf) };
	if header.e_ident[0..4] != EI_MAG
		|| header.e_ident[4] != ELFCLASS64
		|| header.e_ident[5] != ELFDATA2LSB
		|| header.e_type != ET_EXEC
		|| header.e_machine != EM_X86_64
	{
		return Err(errno!(EINVAL));
	}

	let mut vmspace = VMSpace::new()?;
	for i in 0..header.e_phnum {
		let off = header.e_phoff + i as u64 * header.e_phentsize as u64;
		let mut ph_buf = [0u8; core::mem::size_of::<ProgramHeader>()];
		fs::read_exact(&mut inode, &mut ph_buf, off)?;
		let ph: ProgramHeader = unsafe { bytes::from_bytes(&ph_buf) };
		if ph.p_type != PT_LOAD {
			continue;
		}
		let start = page_round_down(ph.p_vaddr as usize);
		let end = page_round_up(ph.p_vaddr as usize + ph.p_memsz as usize);
		let skew = ph.p_vaddr as usize - start;
		let mut pte_flags = flags::PRESENT | flags::USER;
		if ph.p_flags & PF_W != 0 {
			pte_flags |= flags::WRITE;
		}
		if ph.p_flags & PF_X == 0 {
			pte_flags |= flags::NO_EXECUTE;
		}
		vmspace.add_mapping(Mapping {
			start,
			end,
			flags: pte_flags,
			source: Some(InodeSource {
				inode: inode.clone(),
				file_offset: ph.p_offset.saturating_sub(skew as u64),
				file_len: skew + ph.p_filesz as usize,
			}),
		})?;
	}

	let stack_pointer = build_stack(&mut vmspace, argv, envp)?;
	Ok(Loaded {
		vmspace,
		entry: header.e_entry as usize,
		stack_pointer,
	})
}

/// Writes `argc`, the `argv`/`envp` pointer arrays (each null-terminated) and their string
/// bytes into a freshly mapped stack region, returning the stack pointer to resume execution
/// with: `[argc][argv ptrs...][NULL][envp ptrs...][NULL][AT_NULL auxv][strings...]`.
fn build_stack(vmspace: &mut VMSpace, argv: &[Vec<u8>], envp: &[Vec<u8>]) -> Result<usize, Errno> {
	let stack_base = USER_STACK_TOP - USER_STACK_PAGES * PAGE_SIZE;
	let mut pages = Vec::with_capacity(USER_STACK_PAGES);
	for i in 0..USER_STACK_PAGES {
		let page = buddy::alloc_zeroed(0).ok_or(errno!(ENOMEM))?;
		vmspace.map(
			stack_base + i * PAGE_SIZE,
			page.addr(),
			flags::PRESENT | flags::WRITE | flags::USER | flags::NO_EXECUTE,
		)?;
		pages.push(page);
	}
	// A scratch buffer mirroring the mapped region lets us lay the image out with ordinary
	// slice writes, then copy the whole thing into the mapped pages in one pass.
	let mut image = alloc::vec![0u8; USER_STACK_PAGES * PAGE_SIZE];
	let mut string_off = image.len();
	let mut place_string = |image: &mut [u8], s: &[u8]| -> Result<usize, Errno> {
		let len = s.len() + 1;
		if len > string_off {
			return Err(errno!(E2BIG));
		}
		string_off -= len;
		image[string_off..string_off + s.len()].copy_from_slice(s);
		image[string_off + s.len()] = 0;
		Ok(stack_base + string_off)
	};
	let argv_ptrs: Vec<usize> = argv
		.iter()
		.map(|s| place_string(&mut image, s))
		.collect::<Result<_, _>>()?;
	let envp_ptrs: Vec<usize> = envp
		.iter()
		.map(|s| place_string(&mut image, s))
		.collect::<Result<_, _>>()?;

	let ptr_words = 1 + argv_ptrs.len() + 1 + envp_ptrs.len() + 1 + 2;
	let ptr_area_len = ptr_words * 8;
	if ptr_area_len > string_off {
		return Err(errno!(E2BIG));
	}
	let ptr_area_start = string_off - ptr_area_len;
	let mut w = ptr_area_start;
	let mut put = |image: &mut [u8], val: u64| {
		image[w..w + 8].copy_from_slice(&val.to_ne_bytes());
		w += 8;
	};
	put(&mut image, argv_ptrs.len() as u64);
	for p in &argv_ptrs {
		put(&mut image, *p as u64);
	}
	put(&mut image, 0);
	for p in &envp_ptrs {
		put(&mut image, *p as u64);
	}
	put(&mut image, 0);
	// AT_NULL auxv terminator; this kernel's dynamic loader (out of scope) needs nothing more
	// elaborate than that from auxv today.
	put(&mut image, 0);
	put(&mut image, 0);

	for (i, page) in pages.into_iter().enumerate() {
		let dst = page.as_mut_ptr();
		let src = &image[i * PAGE_SIZE..(i + 1) * PAGE_SIZE];
		// SAFETY: `page` is a freshly allocated, exclusively owned page.
		unsafe { core::ptr::copy_nonoverlapping(src.as_ptr(), dst, PAGE_SIZE) };
		vmspace.own(page);
	}
	Ok(stack_base + ptr_area_start)
}
