//! Routes each packet to one of several registered receivers by its source
//! address. Every distinct source is assigned to exactly one receiver and
//! given a small client id within it; the id is written into the leading
//! bytes of the packet's destination address so the downstream client can
//! map responses back to their origin.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use pipeline::Receive;
use wire::object::{Chain, Kind, Layer, OwnedChain};

use crate::trie::Trie;

/// How new clients are spread over the registered receivers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Mode {
	RoundRobin,
	/// Like round-robin, but a receiver takes `weight` consecutive new
	/// clients before the next receiver is up.
	Weighted,
	Random,
}

struct Entry<R> {
	recv: R,
	weight: u32,
	/// Clients assigned so far; doubles as the next client id.
	clients: u32,
}

#[derive(Clone, Copy)]
struct Assignment {
	receiver: usize,
	id: u32,
}

pub struct IpSplit<R> {
	receivers: Vec<Entry<R>>,
	mode: Mode,
	at: usize,
	weight_left: u32,
	trie: Trie<Assignment>,
	rng: StdRng,
	/// The copy mask applied when handing a packet to a receiver.
	pub mask: u16,
	pub discarded: u64,
}

impl<R: Receive<OwnedChain>> IpSplit<R> {
	pub fn new(mode: Mode, mask: u16) -> Self {
		Self {
			receivers: Vec::new(),
			mode,
			at: 0,
			weight_left: 0,
			trie: Trie::new(),
			rng: StdRng::from_entropy(),
			mask,
			discarded: 0,
		}
	}

	/// Reseed the random receiver selection, for reproducible runs.
	pub fn seed(&mut self, seed: u64) {
		self.rng = StdRng::seed_from_u64(seed);
	}

	pub fn add(&mut self, recv: R, weight: u32) {
		assert!(weight > 0, "weight is zero");
		if self.receivers.is_empty() {
			self.weight_left = weight;
		}
		self.receivers.push(Entry { recv, weight, clients: 0 });
	}

	/// Total number of clients assigned to a receiver so far.
	pub fn clients_of(&self, receiver: usize) -> u32 {
		self.receivers[receiver].clients
	}

	fn next_receiver(&mut self) -> usize {
		match self.mode {
			Mode::RoundRobin => {
				let at = self.at;
				self.at = (self.at + 1) % self.receivers.len();
				at
			}
			Mode::Weighted => {
				if self.weight_left == 0 {
					self.at = (self.at + 1) % self.receivers.len();
					self.weight_left = self.receivers[self.at].weight;
				}
				self.weight_left -= 1;
				self.at
			}
			Mode::Random => self.rng.gen_range(0..self.receivers.len()),
		}
	}

	/// Route one decoded packet. The destination address of the innermost
	/// IPv6 layer is overwritten with the client id.
	pub fn route(&mut self, chain: &mut Chain) {
		assert!(!self.receivers.is_empty(), "no receiver(s) set");

		let Some(layer) = chain.iter_inward().find(|l| matches!(l.kind(), Kind::Ip | Kind::Ip6)) else {
			self.discarded += 1;
			log::warn!("packet discarded (missing ip/ip6 layer)");
			return;
		};

		let src = match layer {
			Layer::Ip6(ip6) => ip6.src,
			Layer::Ip(_) => {
				// Source rewriting is only defined for IPv6.
				self.discarded += 1;
				log::warn!("packet discarded (IPv4 source splitting not supported)");
				return;
			}
			_ => unreachable!(),
		};

		let assignment = if let Some(found) = self.trie.get(&src) {
			*found
		} else {
			let receiver = self.next_receiver();
			let entry = &mut self.receivers[receiver];
			let assignment = Assignment { receiver, id: entry.clients };
			entry.clients += 1;

			*self.trie.get_or_insert_with(&src, || assignment)
		};

		let Some(Layer::Ip6(ip6)) = chain.find_mut(Kind::Ip6) else { unreachable!() };
		// Client id into bytes 0-3 of the destination, host byte order.
		ip6.dst[..4].copy_from_slice(&assignment.id.to_ne_bytes());

		let owned = chain.copy(self.mask);
		self.receivers[assignment.receiver].recv.receive(owned);
	}
}

impl<R: Receive<OwnedChain>> Receive<&mut Chain<'_>> for IpSplit<R> {
	fn receive(&mut self, chain: &mut Chain) {
		self.route(chain)
	}
}
