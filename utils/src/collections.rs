//! Re-exports of the `alloc` collections used across the kernel, grouped under one path so
//! kernel code imports `utils::collections::*` rather than reaching into `alloc` directly.

pub mod string {
	pub use alloc::string::String;
}

pub mod vec {
	pub use alloc::vec::Vec;
}

pub mod btreemap {
	pub use alloc::collections::BTreeMap;
}
