//! The object model: one tagged view record per decoded layer, chained
//! innermost-to-outermost over a shared packet buffer. Fixed-size header
//! layers are decoded by value; the capture record and the transport payload
//! borrow byte ranges and are therefore only valid while the packet buffer
//! is. Handing a chain to another thread goes through [`Chain::copy`], which
//! deep-copies a kind-masked subset into an [`OwnedChain`].

use pipeline::Receive;

/// A capture timestamp, UTC seconds plus nanoseconds.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Ts {
	pub sec: u64,
	pub nsec: u32,
}

/// The discriminator of a layer record.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Kind {
	Pcap,
	Ether,
	Null,
	Loop,
	LinuxSll,
	LinuxSll2,
	Ieee802,
	Gre,
	Ip,
	Ip6,
	Icmp,
	Icmp6,
	Udp,
	Tcp,
	Payload,
	Dns,
}

impl Kind {
	/// The kind's bit in a copy mask.
	pub const fn bit(self) -> u16 {
		1 << self as u16
	}

	/// A mask selecting every kind.
	pub const ALL: u16 = u16::MAX;
}

/// One captured record, borrowing the packet bytes.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Pcap<'a> {
	pub ts: Ts,
	pub caplen: u32,
	pub origlen: u32,
	pub snaplen: u32,
	pub linktype: u32,
	/// The capture file had opposite endianness; 16/32-bit fields of
	/// enclosed link headers inherit the swap.
	pub is_swapped: bool,
	pub bytes: &'a [u8],
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Ether {
	pub dhost: [u8; 6],
	pub shost: [u8; 6],
	pub ethertype: u16,
}

/// BSD loopback encapsulation; the family field is in the byteorder of the
/// capturing host.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Null {
	pub family: u32,
}

/// OpenBSD loopback; the family field is always big-endian.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Loop {
	pub family: u32,
}

/// Linux cooked capture v1.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LinuxSll {
	pub packet_type: u16,
	pub arp_hardware: u16,
	pub link_layer_address_length: u16,
	pub link_layer_address: [u8; 8],
	pub ethertype: u16,
}

/// Linux cooked capture v2.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LinuxSll2 {
	pub protocol_type: u16,
	pub interface_index: u32,
	pub arp_hardware: u16,
	pub packet_type: u8,
	pub link_layer_address_length: u8,
	pub link_layer_address: [u8; 8],
}

/// An IEEE 802.1Q/802.1ad/QinQ tag.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Ieee802 {
	pub tpid: u16,
	pub pcp: u8,
	pub dei: u8,
	pub vid: u16,
	pub ethertype: u16,
}

/// GRE, header fields only.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Gre {
	pub gre_flags: u16,
	pub ethertype: u16,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Ip {
	pub v: u8,
	pub hl: u8,
	pub tos: u8,
	pub len: u16,
	pub id: u16,
	pub off: u16,
	pub ttl: u8,
	pub proto: u8,
	pub sum: u16,
	pub src: [u8; 4],
	pub dst: [u8; 4],
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Ip6 {
	pub flow: u32,
	pub plen: u16,
	pub nxt: u8,
	pub hlim: u8,
	pub src: [u8; 16],
	pub dst: [u8; 16],
	/// Set when a fragment extension header was seen; `frag_offlg` and
	/// `frag_ident` are only meaningful then.
	pub is_frag: bool,
	pub frag_offlg: u16,
	pub frag_ident: u32,
	/// Set when a type 0 routing header with segments left was seen.
	pub have_rtdst: bool,
	pub rtdst: [u8; 16],
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Icmp {
	pub ty: u8,
	pub code: u8,
	pub cksum: u16,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Icmp6 {
	pub ty: u8,
	pub code: u8,
	pub cksum: u16,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Udp {
	pub sport: u16,
	pub dport: u16,
	pub ulen: u16,
	pub sum: u16,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Tcp {
	pub sport: u16,
	pub dport: u16,
	pub seq: u32,
	pub ack: u32,
	pub off: u8,
	pub x2: u8,
	pub flags: u8,
	pub win: u16,
	pub sum: u16,
	pub urp: u16,
	pub opts: [u8; 40],
	pub opts_len: u8,
}

/// The innermost transport payload.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Payload<'a> {
	pub bytes: &'a [u8],
	/// `len_on_wire - len_useful` when the transport header declared a
	/// length shorter than the captured buffer.
	pub padding: usize,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Layer<'a> {
	Pcap(Pcap<'a>),
	Ether(Ether),
	Null(Null),
	Loop(Loop),
	LinuxSll(LinuxSll),
	LinuxSll2(LinuxSll2),
	Ieee802(Ieee802),
	Gre(Gre),
	Ip(Ip),
	Ip6(Ip6),
	Icmp(Icmp),
	Icmp6(Icmp6),
	Udp(Udp),
	Tcp(Tcp),
	Payload(Payload<'a>),
}

impl Layer<'_> {
	pub fn kind(&self) -> Kind {
		match self {
			Layer::Pcap(_) => Kind::Pcap,
			Layer::Ether(_) => Kind::Ether,
			Layer::Null(_) => Kind::Null,
			Layer::Loop(_) => Kind::Loop,
			Layer::LinuxSll(_) => Kind::LinuxSll,
			Layer::LinuxSll2(_) => Kind::LinuxSll2,
			Layer::Ieee802(_) => Kind::Ieee802,
			Layer::Gre(_) => Kind::Gre,
			Layer::Ip(_) => Kind::Ip,
			Layer::Ip6(_) => Kind::Ip6,
			Layer::Icmp(_) => Kind::Icmp,
			Layer::Icmp6(_) => Kind::Icmp6,
			Layer::Udp(_) => Kind::Udp,
			Layer::Tcp(_) => Kind::Tcp,
			Layer::Payload(_) => Kind::Payload,
		}
	}
}

/// A decoded packet: layer views ordered outermost first. The enclosing
/// frame of layer `n` is layer `n - 1`.
#[derive(Default, Debug)]
pub struct Chain<'a> {
	layers: Vec<Layer<'a>>,
}

impl<'a> Chain<'a> {
	pub fn new() -> Self {
		// Seven layers covers the deepest walk we decode (pcap, link,
		// three 802.1x tags, ip, transport) before the payload.
		Self { layers: Vec::with_capacity(8) }
	}

	pub fn push(&mut self, layer: Layer<'a>) {
		self.layers.push(layer);
	}

	pub fn len(&self) -> usize {
		self.layers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.layers.is_empty()
	}

	pub fn layers(&self) -> &[Layer<'a>] {
		&self.layers
	}

	/// The deepest decoded layer.
	pub fn innermost(&self) -> Option<&Layer<'a>> {
		self.layers.last()
	}

	/// The layer enclosing `idx`.
	pub fn prev(&self, idx: usize) -> Option<&Layer<'a>> {
		idx.checked_sub(1).and_then(|prev| self.layers.get(prev))
	}

	/// Walk from the innermost layer outwards.
	pub fn iter_inward(&self) -> impl Iterator<Item = &Layer<'a>> {
		self.layers.iter().rev()
	}

	/// The innermost layer of the given kind.
	pub fn find(&self, kind: Kind) -> Option<&Layer<'a>> {
		self.iter_inward().find(|layer| layer.kind() == kind)
	}

	pub fn find_mut(&mut self, kind: Kind) -> Option<&mut Layer<'a>> {
		self.layers.iter_mut().rev().find(|layer| layer.kind() == kind)
	}

	pub fn payload(&self) -> Option<&Payload<'a>> {
		match self.find(Kind::Payload) {
			Some(Layer::Payload(payload)) => Some(payload),
			_ => None,
		}
	}

	/// Deep-copy the layers selected by `mask` into heap-owned records,
	/// preserving their relative order. The `prev` relationship of dropped
	/// layers is re-linked by omission.
	pub fn copy(&self, mask: u16) -> OwnedChain {
		let layers = self
			.layers
			.iter()
			.filter(|layer| layer.kind().bit() & mask != 0)
			.map(|layer| match layer {
				Layer::Pcap(v) => OwnedLayer::Pcap(OwnedPcap {
					ts: v.ts,
					caplen: v.caplen,
					origlen: v.origlen,
					snaplen: v.snaplen,
					linktype: v.linktype,
					is_swapped: v.is_swapped,
					bytes: v.bytes.into(),
				}),
				Layer::Ether(v) => OwnedLayer::Ether(*v),
				Layer::Null(v) => OwnedLayer::Null(*v),
				Layer::Loop(v) => OwnedLayer::Loop(*v),
				Layer::LinuxSll(v) => OwnedLayer::LinuxSll(*v),
				Layer::LinuxSll2(v) => OwnedLayer::LinuxSll2(*v),
				Layer::Ieee802(v) => OwnedLayer::Ieee802(*v),
				Layer::Gre(v) => OwnedLayer::Gre(*v),
				Layer::Ip(v) => OwnedLayer::Ip(*v),
				Layer::Ip6(v) => OwnedLayer::Ip6(*v),
				Layer::Icmp(v) => OwnedLayer::Icmp(*v),
				Layer::Icmp6(v) => OwnedLayer::Icmp6(*v),
				Layer::Udp(v) => OwnedLayer::Udp(*v),
				Layer::Tcp(v) => OwnedLayer::Tcp(*v),
				Layer::Payload(v) => OwnedLayer::Payload(OwnedPayload {
					bytes: v.bytes.into(),
					padding: v.padding,
				}),
			})
			.collect();

		OwnedChain { layers }
	}
}

/// An owned capture record.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OwnedPcap {
	pub ts: Ts,
	pub caplen: u32,
	pub origlen: u32,
	pub snaplen: u32,
	pub linktype: u32,
	pub is_swapped: bool,
	pub bytes: Box<[u8]>,
}

/// An owned transport payload.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OwnedPayload {
	pub bytes: Box<[u8]>,
	pub padding: usize,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum OwnedLayer {
	Pcap(OwnedPcap),
	Ether(Ether),
	Null(Null),
	Loop(Loop),
	LinuxSll(LinuxSll),
	LinuxSll2(LinuxSll2),
	Ieee802(Ieee802),
	Gre(Gre),
	Ip(Ip),
	Ip6(Ip6),
	Icmp(Icmp),
	Icmp6(Icmp6),
	Udp(Udp),
	Tcp(Tcp),
	Payload(OwnedPayload),
}

impl OwnedLayer {
	pub fn kind(&self) -> Kind {
		match self {
			OwnedLayer::Pcap(_) => Kind::Pcap,
			OwnedLayer::Ether(_) => Kind::Ether,
			OwnedLayer::Null(_) => Kind::Null,
			OwnedLayer::Loop(_) => Kind::Loop,
			OwnedLayer::LinuxSll(_) => Kind::LinuxSll,
			OwnedLayer::LinuxSll2(_) => Kind::LinuxSll2,
			OwnedLayer::Ieee802(_) => Kind::Ieee802,
			OwnedLayer::Gre(_) => Kind::Gre,
			OwnedLayer::Ip(_) => Kind::Ip,
			OwnedLayer::Ip6(_) => Kind::Ip6,
			OwnedLayer::Icmp(_) => Kind::Icmp,
			OwnedLayer::Icmp6(_) => Kind::Icmp6,
			OwnedLayer::Udp(_) => Kind::Udp,
			OwnedLayer::Tcp(_) => Kind::Tcp,
			OwnedLayer::Payload(_) => Kind::Payload,
		}
	}
}

impl PartialEq<Layer<'_>> for OwnedLayer {
	fn eq(&self, other: &Layer<'_>) -> bool {
		match (self, other) {
			(OwnedLayer::Pcap(a), Layer::Pcap(b)) => {
				a.ts == b.ts
					&& a.caplen == b.caplen && a.origlen == b.origlen
					&& a.snaplen == b.snaplen && a.linktype == b.linktype
					&& a.is_swapped == b.is_swapped && &*a.bytes == b.bytes
			}
			(OwnedLayer::Ether(a), Layer::Ether(b)) => a == b,
			(OwnedLayer::Null(a), Layer::Null(b)) => a == b,
			(OwnedLayer::Loop(a), Layer::Loop(b)) => a == b,
			(OwnedLayer::LinuxSll(a), Layer::LinuxSll(b)) => a == b,
			(OwnedLayer::LinuxSll2(a), Layer::LinuxSll2(b)) => a == b,
			(OwnedLayer::Ieee802(a), Layer::Ieee802(b)) => a == b,
			(OwnedLayer::Gre(a), Layer::Gre(b)) => a == b,
			(OwnedLayer::Ip(a), Layer::Ip(b)) => a == b,
			(OwnedLayer::Ip6(a), Layer::Ip6(b)) => a == b,
			(OwnedLayer::Icmp(a), Layer::Icmp(b)) => a == b,
			(OwnedLayer::Icmp6(a), Layer::Icmp6(b)) => a == b,
			(OwnedLayer::Udp(a), Layer::Udp(b)) => a == b,
			(OwnedLayer::Tcp(a), Layer::Tcp(b)) => a == b,
			(OwnedLayer::Payload(a), Layer::Payload(b)) => &*a.bytes == b.bytes && a.padding == b.padding,
			_ => false,
		}
	}
}

/// A deep-copied packet that owns its bytes and may cross threads.
#[derive(Clone, Default, PartialEq, Debug)]
pub struct OwnedChain {
	layers: Vec<OwnedLayer>,
}

impl OwnedChain {
	pub fn layers(&self) -> &[OwnedLayer] {
		&self.layers
	}

	pub fn innermost(&self) -> Option<&OwnedLayer> {
		self.layers.last()
	}

	pub fn iter_inward(&self) -> impl Iterator<Item = &OwnedLayer> {
		self.layers.iter().rev()
	}

	pub fn find(&self, kind: Kind) -> Option<&OwnedLayer> {
		self.iter_inward().find(|layer| layer.kind() == kind)
	}

	pub fn payload(&self) -> Option<&OwnedPayload> {
		match self.find(Kind::Payload) {
			Some(OwnedLayer::Payload(payload)) => Some(payload),
			_ => None,
		}
	}

	pub fn ip6(&self) -> Option<&Ip6> {
		match self.find(Kind::Ip6) {
			Some(OwnedLayer::Ip6(ip6)) => Some(ip6),
			_ => None,
		}
	}

	pub fn ip(&self) -> Option<&Ip> {
		match self.find(Kind::Ip) {
			Some(OwnedLayer::Ip(ip)) => Some(ip),
			_ => None,
		}
	}
}

/// A filter copying the kind-masked subset of each chain to an owned chain
/// and pushing it on, for handing packets across a thread boundary.
pub struct CopyFilter<R> {
	pub mask: u16,
	recv: R,
}

impl<R> CopyFilter<R> {
	pub fn new(mask: u16, recv: R) -> Self {
		Self { mask, recv }
	}

	pub fn into_inner(self) -> R {
		self.recv
	}
}

impl<'a, R: Receive<OwnedChain>> Receive<&Chain<'a>> for CopyFilter<R> {
	fn receive(&mut self, chain: &Chain<'a>) {
		self.recv.receive(chain.copy(self.mask));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample<'a>(packet: &'a [u8]) -> Chain<'a> {
		let mut chain = Chain::new();
		chain.push(Layer::Pcap(Pcap {
			ts: Ts { sec: 1, nsec: 2 },
			caplen: packet.len() as u32,
			origlen: packet.len() as u32,
			snaplen: 0x40000,
			linktype: 1,
			is_swapped: false,
			bytes: packet,
		}));
		chain.push(Layer::Ip6(Ip6 {
			flow: 0,
			plen: 12,
			nxt: 17,
			hlim: 64,
			src: [1; 16],
			dst: [2; 16],
			is_frag: false,
			frag_offlg: 0,
			frag_ident: 0,
			have_rtdst: false,
			rtdst: [0; 16],
		}));
		chain.push(Layer::Udp(Udp { sport: 1234, dport: 53, ulen: 20, sum: 0 }));
		chain.push(Layer::Payload(Payload { bytes: &packet[8..], padding: 0 }));
		chain
	}

	#[test]
	fn copy_is_deep_equal_identity() {
		let packet = (0u8..64).collect::<Vec<_>>();
		let chain = sample(&packet);

		let owned = chain.copy(Kind::ALL);

		assert_eq!(owned.layers().len(), chain.len());
		for (copy, orig) in owned.layers().iter().zip(chain.layers()) {
			assert_eq!(copy, orig);
		}
	}

	#[test]
	fn copy_mask_selects_layers() {
		let packet = (0u8..64).collect::<Vec<_>>();
		let chain = sample(&packet);

		let owned = chain.copy(Kind::Ip6.bit() | Kind::Payload.bit());

		assert_eq!(owned.layers().len(), 2);
		assert_eq!(owned.layers()[0].kind(), Kind::Ip6);
		assert_eq!(owned.layers()[1].kind(), Kind::Payload);
		// The payload now encloses onto ip6 directly.
		assert!(owned.ip6().is_some());
		assert!(owned.find(Kind::Udp).is_none());
	}

	#[test]
	fn copy_filter_pushes_owned_chains() {
		use pipeline::{Func, Receive as _};

		let packet = (0u8..64).collect::<Vec<_>>();
		let chain = sample(&packet);

		let mut seen: Vec<OwnedChain> = Vec::new();
		{
			let mut filter = CopyFilter::new(Kind::Ip6.bit() | Kind::Payload.bit(), Func(|owned| seen.push(owned)));
			filter.receive(&chain);
			filter.receive(&chain);
		}

		assert_eq!(seen.len(), 2);
		assert_eq!(seen[0].layers().len(), 2);
		assert_eq!(seen[0], seen[1]);
	}

	#[test]
	fn chain_traversal() {
		let packet = (0u8..64).collect::<Vec<_>>();
		let chain = sample(&packet);

		assert_eq!(chain.innermost().unwrap().kind(), Kind::Payload);
		assert_eq!(chain.prev(3).unwrap().kind(), Kind::Udp);
		assert_eq!(chain.prev(0).map(Layer::kind), None);
		assert_eq!(chain.find(Kind::Ip6).unwrap().kind(), Kind::Ip6);
		assert!(chain.find(Kind::Gre).is_none());
	}
}
