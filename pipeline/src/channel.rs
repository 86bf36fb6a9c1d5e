//! A lock-free bounded channel for exactly one producer and one consumer
//! thread. Indices are masked, so the capacity must be a power of two; on
//! contention both sides politely yield the OS thread instead of sleeping.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crate::{Produce, Receive};

struct Inner<T> {
	buf: Box<[UnsafeCell<MaybeUninit<T>>]>,
	mask: usize,
	/// Consumer index. Only the `Get` endpoint advances it.
	head: AtomicUsize,
	/// Producer index. Only the `Put` endpoint advances it.
	tail: AtomicUsize,
	closed: AtomicBool,
}

// The endpoints enforce the single-producer/single-consumer discipline, and
// each slot is written before the tail advance publishes it.
unsafe impl<T: Send> Send for Inner<T> {}
unsafe impl<T: Send> Sync for Inner<T> {}

impl<T> Inner<T> {
	fn size(&self) -> usize {
		self.tail.load(Ordering::Acquire).wrapping_sub(self.head.load(Ordering::Acquire))
	}
}

impl<T> Drop for Inner<T> {
	fn drop(&mut self) {
		let head = *self.head.get_mut();
		let tail = *self.tail.get_mut();

		for at in head..tail {
			unsafe { (*self.buf[at & self.mask].get()).assume_init_drop() };
		}
	}
}

/// Create a channel with the given capacity, returning the producer and
/// consumer endpoints.
pub fn spsc<T: Send>(capacity: usize) -> (Put<T>, Get<T>) {
	assert!(capacity >= 4 && capacity.is_power_of_two(), "invalid capacity: {capacity}");

	let inner = Arc::new(Inner {
		buf: (0..capacity).map(|_| UnsafeCell::new(MaybeUninit::uninit())).collect(),
		mask: capacity - 1,
		head: AtomicUsize::new(0),
		tail: AtomicUsize::new(0),
		closed: AtomicBool::new(false),
	});

	(Put { inner: inner.clone() }, Get { inner })
}

/// The producer endpoint.
pub struct Put<T> {
	inner: Arc<Inner<T>>,
}

impl<T: Send> Put<T> {
	/// Enqueue, yielding the thread until space is available.
	pub fn put(&self, mut item: T) {
		loop {
			match self.try_put(item) {
				Ok(()) => return,
				Err(back) => item = back,
			}
			thread::yield_now();
		}
	}

	/// Enqueue without blocking; on a full ring the item is handed back.
	pub fn try_put(&self, item: T) -> Result<(), T> {
		let inner = &*self.inner;

		let tail = inner.tail.load(Ordering::Relaxed);
		let head = inner.head.load(Ordering::Acquire);

		if tail.wrapping_sub(head) > inner.mask {
			return Err(item);
		}

		unsafe { (*inner.buf[tail & inner.mask].get()).write(item) };
		inner.tail.store(tail.wrapping_add(1), Ordering::Release);

		Ok(())
	}

	/// Close the channel, unblocking the consumer. Idempotent.
	pub fn close(&self) {
		self.inner.closed.store(true, Ordering::Release);
	}

	pub fn size(&self) -> usize {
		self.inner.size()
	}

	pub fn full(&self) -> bool {
		self.inner.size() > self.inner.mask
	}
}

impl<T> Drop for Put<T> {
	fn drop(&mut self) {
		// No producer is left, which is indistinguishable from a close.
		self.inner.closed.store(true, Ordering::Release);
	}
}

impl<T: Send> Receive<T> for Put<T> {
	fn receive(&mut self, item: T) {
		self.put(item)
	}
}

/// The consumer endpoint.
pub struct Get<T> {
	inner: Arc<Inner<T>>,
}

impl<T: Send> Get<T> {
	/// Dequeue, yielding the thread until an item arrives or the channel is
	/// closed and drained, which returns `None`.
	pub fn get(&self) -> Option<T> {
		loop {
			if let Some(item) = self.try_get() {
				return Some(item);
			}
			thread::yield_now();
			if self.inner.closed.load(Ordering::Acquire) {
				// Drain anything enqueued before the close was observed.
				return match self.try_get() {
					Some(item) => Some(item),
					None => {
						log::info!("channel closed");
						None
					}
				};
			}
		}
	}

	pub fn try_get(&self) -> Option<T> {
		let inner = &*self.inner;

		let head = inner.head.load(Ordering::Relaxed);
		let tail = inner.tail.load(Ordering::Acquire);

		if head == tail {
			return None;
		}

		let item = unsafe { (*inner.buf[head & inner.mask].get()).assume_init_read() };
		inner.head.store(head.wrapping_add(1), Ordering::Release);

		Some(item)
	}

	/// Deliver every item to `recv` until the channel is closed and drained.
	pub fn run(&self, mut recv: impl Receive<T>) {
		while let Some(item) = self.get() {
			recv.receive(item);
		}
	}

	pub fn close(&self) {
		self.inner.closed.store(true, Ordering::Release);
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::Acquire)
	}

	pub fn size(&self) -> usize {
		self.inner.size()
	}
}

impl<T: Send> Produce<T> for Get<T> {
	fn produce(&mut self) -> Option<T> {
		self.get()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	#[should_panic(expected = "invalid capacity")]
	fn capacity_must_be_pow2() {
		let _ = spsc::<u32>(6);
	}

	#[test]
	fn fifo_and_size() {
		let (put, get) = spsc(4);

		assert_eq!(get.try_get(), None);

		for n in 0..4u32 {
			put.try_put(n).unwrap();
			assert_eq!(put.size(), n as usize + 1);
		}
		assert!(put.full());
		assert_eq!(put.try_put(4), Err(4));

		for n in 0..4u32 {
			assert_eq!(get.try_get(), Some(n));
		}
		assert_eq!(get.size(), 0);
	}

	#[test]
	fn close_drains_then_unblocks() {
		let (put, get) = spsc(4);

		put.put(7u32);
		put.close();
		put.close();

		assert_eq!(get.get(), Some(7));
		assert_eq!(get.get(), None);
	}

	#[test]
	fn crosses_threads() {
		let (put, get) = spsc(8);

		let producer = std::thread::spawn(move || {
			for n in 0..10_000u64 {
				put.put(n);
			}
		});

		let mut expect = 0;
		while let Some(n) = get.get() {
			assert_eq!(n, expect);
			expect += 1;
		}

		assert_eq!(expect, 10_000);
		producer.join().unwrap();
	}

	#[test]
	fn run_delivers_until_close() {
		let (put, get) = spsc(8);

		let consumer = std::thread::spawn(move || {
			let mut seen = Vec::new();
			get.run(crate::Func(|v: u32| seen.push(v)));
			seen
		});

		for n in 0..100u32 {
			put.put(n);
		}
		put.close();

		assert_eq!(consumer.join().unwrap(), (0..100).collect::<Vec<_>>());
	}

	#[test]
	fn dropped_items_are_freed() {
		let (put, _get) = spsc(4);
		put.put(String::from("left in the ring"));
	}
}
