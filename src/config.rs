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

//! Boot command line.
//!
//! The UEFI loader (out of scope, see the crate root docs) hands the kernel a single string of
//! whitespace-separated `key=value` options, the same shape the reference kernel's `cmdline`
//! module parses. This is the only runtime configuration surface the kernel has: there is no
//! on-disk config file and nothing is reconfigurable once [`init`] has run.

use utils::{collections::string::String, collections::vec::Vec, lock::OnceInit};

struct Cmdline {
	options: Vec<(String, String)>,
}

static CMDLINE: OnceInit<Cmdline> = OnceInit::new();

/// Parses the boot command line. Must be called exactly once, before any code consults
/// [`get`] (in particular, before the FS layer's mount step resolves `root=`).
pub fn init(line: &str) {
	let mut options = Vec::new();
	for word in line.split_whitespace() {
		if let Some((key, value)) = word.split_once('=') {
			options.push((String::from(key), String::from(value)));
		}
	}
	CMDLINE.init(Cmdline { options });
}

/// Looks up a `key=value` option from the boot command line.
pub fn get(key: &str) -> Option<&'static str> {
	CMDLINE
		.get()
		.options
		.iter()
		.find(|(k, _)| k == key)
		.map(|(_, v)| v.as_str())
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn parses_key_value_pairs() {
		init("root=hda1 quiet foo=bar");
		assert_eq!(get("root"), Some("hda1"));
		assert_eq!(get("foo"), Some("bar"));
		assert_eq!(get("quiet"), None);
		assert_eq!(get("missing"), None);
	}
}
