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

//! Anonymous pipes: a fixed-capacity ring buffer shared between a reading end and a writing
//! end, following the same lock-then-sleep-then-retry shape as [`crate::bio::read_block`]
//! rather than holding the pipe's lock across a sleep.

use crate::error::Errno;
use alloc::sync::Arc;
use utils::{errno, limits::PIPE_SIZE, lock::IntMutex};

pub struct Pipe {
	buf: [u8; PIPE_SIZE],
	read_pos: usize,
	count: usize,
	pub readers: u32,
	pub writers: u32,
}

impl Pipe {
	pub fn new() -> Arc<IntMutex<Self>> {
		Arc::new(IntMutex::new(Self {
			buf: [0; PIPE_SIZE],
			read_pos: 0,
			count: 0,
			readers: 1,
			writers: 1,
		}))
	}

	fn drain(&mut self, out: &mut [u8]) -> usize {
		let n = out.len().min(self.count);
		for b in out.iter_mut().take(n) {
			*b = self.buf[self.read_pos];
			self.read_pos = (self.read_pos + 1) % PIPE_SIZE;
		}
		self.count -= n;
		n
	}

	fn fill(&mut self, data: &[u8]) -> usize {
		let n = data.len().min(PIPE_SIZE - self.count);
		let mut write_pos = (self.read_pos + self.count) % PIPE_SIZE;
		for &b in data.iter().take(n) {
			self.buf[write_pos] = b;
			write_pos = (write_pos + 1) % PIPE_SIZE;
		}
		self.count += n;
		n
	}

	/// Whether a read would return data (or EOF) without blocking, for `select`.
	pub fn readable(&self) -> bool {
		self.count > 0 || self.writers == 0
	}

	/// Whether a write would make progress (or fail with `EPIPE`) without blocking, for
	/// `select`.
	pub fn writable(&self) -> bool {
		self.count < PIPE_SIZE || self.readers == 0
	}
}

fn channel(pipe: &Arc<IntMutex<Pipe>>) -> usize {
	Arc::as_ptr(pipe) as usize
}

/// Reads into `buf`, blocking while the pipe is empty and at least one writer remains open.
/// Returns `0` once every writer has closed (end of file), never an error.
pub fn read(pipe: &Arc<IntMutex<Pipe>>, buf: &mut [u8]) -> Result<usize, Errno> {
	loop {
		{
			let mut p = pipe.lock();
			if p.count > 0 {
				let n = p.drain(buf);
				drop(p);
				super::wakeup(channel(pipe));
				return Ok(n);
			}
			if p.writers == 0 {
				return Ok(0);
			}
		}
		super::sleep_on(channel(pipe));
	}
}

/// Writes `buf`, blocking while the pipe is full and at least one reader remains open. Fails
/// with `EPIPE` once every reader has closed.
pub fn write(pipe: &Arc<IntMutex<Pipe>>, buf: &[u8]) -> Result<usize, Errno> {
	let mut done = 0;
	while done < buf.len() {
		{
			let mut p = pipe.lock();
			if p.readers == 0 {
				return Err(errno!(EPIPE));
			}
			if p.count < PIPE_SIZE {
				done += p.fill(&buf[done..]);
				drop(p);
				super::wakeup(channel(pipe));
				continue;
			}
		}
		super::sleep_on(channel(pipe));
	}
	Ok(done)
}

pub fn close_reader(pipe: &Arc<IntMutex<Pipe>>) {
	let mut p = pipe.lock();
	p.readers = p.readers.saturating_sub(1);
	drop(p);
	super::wakeup(channel(pipe));
}

pub fn close_writer(pipe: &Arc<IntMutex<Pipe>>) {
	let mut p = pipe.lock();
	p.writers = p.writers.saturating_sub(1);
	drop(p);
	super::wakeup(channel(pipe));
}
