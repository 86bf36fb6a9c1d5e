//! A filter distributing items to N consumer threads through a fixed array
//! of slots. The receiving side deposits round-robin; each consumer thread
//! also cycles the slots round-robin, sleeping on a per-slot condition until
//! the slot fills or the filter is stopped.
//!
//! In the default mode a consumer blocks at its current slot. With the
//! writers barrier enabled, the slot about to be written next carries a
//! `writers` mark and consumers may skip past any unmarked empty slot; this
//! keeps the extraction order across slots equal to the deposit order even
//! when fewer producers than workers are active.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use utils::error::*;

use crate::Receive;

struct State<T> {
	obj: Option<T>,
	writers: bool,
	end: bool,
}

struct Slot<T> {
	state: Mutex<State<T>>,
	read: Condvar,
	write: Condvar,
}

pub struct Fanout<T> {
	slots: Arc<Vec<Slot<T>>>,
	use_writers: bool,
	at: usize,
	pending: Vec<Box<dyn Receive<T> + Send>>,
	threads: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> Fanout<T> {
	pub fn new(slots: usize) -> Self {
		assert!(slots > 0, "queue size is zero");

		let slots = (0..slots)
			.map(|n| Slot {
				state: Mutex::new(State {
					obj: None,
					// The first slot to be written to carries the mark.
					writers: n == 0,
					end: false,
				}),
				read: Condvar::new(),
				write: Condvar::new(),
			})
			.collect();

		Self {
			slots: Arc::new(slots),
			use_writers: false,
			at: 0,
			pending: Vec::new(),
			threads: Vec::new(),
		}
	}

	/// Preserve cross-slot ordering for consumers. Must be chosen before
	/// `start`.
	pub fn use_writers_barrier(&mut self, on: bool) {
		self.use_writers = on;
	}

	/// Register a consumer. Each consumer gets its own worker thread.
	pub fn add(&mut self, recv: impl Receive<T> + Send + 'static) {
		self.pending.push(Box::new(recv));
	}

	/// Spawn one worker thread per registered consumer.
	pub fn start(&mut self) -> Result {
		if self.pending.is_empty() {
			log::error!("no receiver set");
			return Err(());
		}

		for recv in self.pending.drain(..) {
			let slots = self.slots.clone();
			let use_writers = self.use_writers;

			let thread = thread::Builder::new()
				.name("fanout".into())
				.spawn(move || consume(slots, recv, use_writers))
				.map_err(|err| log::error!("failed to spawn fanout thread: {err}"))?;

			self.threads.push(thread);
		}

		log::debug!("start");
		Ok(())
	}

	/// Flag every slot as ended, wake all consumers and join the worker
	/// threads. In-flight items are delivered before the threads exit.
	pub fn stop(&mut self) {
		for slot in self.slots.iter() {
			let mut state = slot.state.lock();
			state.end = true;
			slot.read.notify_all();
		}

		for thread in self.threads.drain(..) {
			let _ = thread.join();
		}

		log::debug!("stop");
	}
}

impl<T: Send + 'static> Receive<T> for Fanout<T> {
	fn receive(&mut self, item: T) {
		let slot = &self.slots[self.at];
		let mut state = slot.state.lock();

		if self.use_writers {
			state.writers = true;
		}
		while state.obj.is_some() {
			slot.write.wait(&mut state);
		}
		state.writers = false;
		state.obj = Some(item);

		self.at += 1;
		if self.at == self.slots.len() {
			self.at = 0;
		}

		if self.use_writers {
			// Mark the next slot before publishing this one, so that no
			// consumer can overtake the deposit order.
			self.slots[self.at].state.lock().writers = true;
			slot.read.notify_all();
		} else {
			slot.read.notify_one();
		}
	}
}

fn consume<T>(slots: Arc<Vec<Slot<T>>>, mut recv: Box<dyn Receive<T> + Send>, use_writers: bool) {
	let mut ends = 0;
	let mut at = 0;

	while ends < slots.len() {
		let mut slot = &slots[at];
		let mut state = slot.state.lock();

		if !state.end {
			while !state.end && state.obj.is_none() {
				if use_writers && !state.writers {
					// Unwritten and not next in line; move along.
					drop(state);
					at += 1;
					if at == slots.len() {
						at = 0;
					}
					slot = &slots[at];
					state = slot.state.lock();
					continue;
				}
				slot.read.wait(&mut state);
			}
		}

		let obj = state.obj.take();
		if obj.is_some() {
			slot.write.notify_one();
		}
		if state.end {
			ends += 1;
		}
		drop(state);

		if let Some(obj) = obj {
			recv.receive(obj);
		}

		at += 1;
		if at == slots.len() {
			at = 0;
		}
	}
}
