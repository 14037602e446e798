//! This module exists only to import symbols from the kernel, which is compiled as a library
//! (see the crate root docs on why: so host-side test harnesses can link against it without
//! re-linking the whole image).
//!
//! The actual entry point (`_start`) lives in the boot loader's hand-off code, an out-of-scope
//! collaborator that calls [`kernel::main`] once a stack and a UEFI memory map are available.

#![no_std]
#![no_main]

extern crate kernel;
