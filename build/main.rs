//! Build script for the kernel crate.
//!
//! The kernel links against a handful of hand-written assembly routines that live outside the
//! scope of this crate (context switching, trap entry/exit, the syscall trampoline). Those are
//! supplied by the boot loader / CPU bring-up layer at link time; this script only compiles the
//! small amount of glue assembly that *is* part of the kernel image (`src/arch/entry.S`) and wires
//! up the linker script.

use std::{env, path::PathBuf};

fn main() {
	let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
	let arch_dir = manifest_dir.join("src/arch");

	println!("cargo:rerun-if-changed={}", arch_dir.display());
	println!(
		"cargo:rustc-link-arg-bin=dogfood=-T{}",
		arch_dir.join("linker.ld").display()
	);

	cc::Build::new()
		.file(arch_dir.join("entry.S"))
		.flag("-nostdlib")
		.compile("arch_entry");
}
