//! The zero-copy layer decoder: classify a captured record by link type and
//! walk the encapsulations, producing a chain of per-layer views over the
//! packet bytes. The walk stops at the deepest layer it recognizes; a
//! truncated header ends the chain at the enclosing layer. Only a handful of
//! malformed IPv6 extension constructions discard the packet outright.

use utils::bytes::Reader;

use crate::object::*;
use crate::pcap::linktype;

const ETHERTYPE_IP: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;

const IPPROTO_ICMP: u8 = 1;
const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;
const IPPROTO_GRE: u8 = 47;
const IPPROTO_ROUTING: u8 = 43;
const IPPROTO_FRAGMENT: u8 = 44;
const IPPROTO_ICMPV6: u8 = 58;
const IPPROTO_NONE: u8 = 59;

/// Stacked IEEE 802.1x tags decoded before giving up.
const N_IEEE802: usize = 3;

/// Decode the packet of a captured record. `None` discards the packet
/// (malformed in a way that leaves no usable layer).
pub fn decode<'a>(pcap: &Pcap<'a>) -> Option<Chain<'a>> {
	let mut chain = Chain::new();
	chain.push(Layer::Pcap(pcap.clone()));

	let mut r = Reader::new(pcap.bytes);

	match pcap.linktype {
		linktype::NULL => {
			let family = match if pcap.is_swapped { r.need32_swapped() } else { r.need32() } {
				Some(family) => family,
				None => return Some(chain),
			};

			match family {
				2 | 24 | 28 | 30 => {
					chain.push(Layer::Null(Null { family }));
					ip(&mut chain, &mut r)?;
				}
				_ => {}
			}
		}
		linktype::LOOP => {
			let Some(family) = r.need32() else { return Some(chain) };

			match family {
				2 | 24 | 28 | 30 => {
					chain.push(Layer::Loop(Loop { family }));
					ip(&mut chain, &mut r)?;
				}
				_ => {}
			}
		}
		linktype::EN10MB => {
			let hdr = (|| {
				Some(Ether {
					dhost: r.need_array()?,
					shost: r.need_array()?,
					ethertype: r.need16()?,
				})
			})();
			let Some(hdr) = hdr else { return Some(chain) };

			match hdr.ethertype {
				// 802.1q, 802.1ad, 802.1 QinQ non-standard
				0x8100 | 0x88a8 | 0x9100 => {
					chain.push(Layer::Ether(hdr));
					ieee802(&mut chain, &mut r, hdr.ethertype)?;
				}
				ETHERTYPE_IP | ETHERTYPE_IPV6 => {
					chain.push(Layer::Ether(hdr));
					ip(&mut chain, &mut r)?;
				}
				_ => {}
			}
		}
		linktype::LINUX_SLL => {
			let hdr = (|| {
				Some(LinuxSll {
					packet_type: r.need16()?,
					arp_hardware: r.need16()?,
					link_layer_address_length: r.need16()?,
					link_layer_address: r.need_array()?,
					ethertype: r.need16()?,
				})
			})();
			let Some(hdr) = hdr else { return Some(chain) };

			match hdr.ethertype {
				0x8100 | 0x88a8 | 0x9100 => {
					chain.push(Layer::LinuxSll(hdr));
					ieee802(&mut chain, &mut r, hdr.ethertype)?;
				}
				ETHERTYPE_IP | ETHERTYPE_IPV6 => {
					chain.push(Layer::LinuxSll(hdr));
					ip(&mut chain, &mut r)?;
				}
				_ => {}
			}
		}
		linktype::LINUX_SLL2 => {
			let hdr = (|| {
				let protocol_type = r.need16()?;
				r.skip(2)?; // reserved
				Some(LinuxSll2 {
					protocol_type,
					interface_index: r.need32()?,
					arp_hardware: r.need16()?,
					packet_type: r.need8()?,
					link_layer_address_length: r.need8()?,
					link_layer_address: r.need_array()?,
				})
			})();
			let Some(hdr) = hdr else { return Some(chain) };

			match hdr.protocol_type {
				0x8100 | 0x88a8 | 0x9100 => {
					chain.push(Layer::LinuxSll2(hdr));
					ieee802(&mut chain, &mut r, hdr.protocol_type)?;
				}
				ETHERTYPE_IP | ETHERTYPE_IPV6 => {
					chain.push(Layer::LinuxSll2(hdr));
					ip(&mut chain, &mut r)?;
				}
				_ => {}
			}
		}
		linktype::RAW | linktype::IPV4 | linktype::IPV6 => {
			ip(&mut chain, &mut r)?;
		}
		_ => {}
	}

	Some(chain)
}

fn ieee802<'a>(chain: &mut Chain<'a>, r: &mut Reader<'a>, mut tpid: u16) -> Option<()> {
	for n in 0..N_IEEE802 {
		let (Some(tci), Some(ethertype)) = (r.need16(), r.need16()) else { return Some(()) };

		let tag = Ieee802 {
			tpid,
			pcp: (tci >> 13) as u8,
			dei: ((tci >> 12) & 1) as u8,
			vid: tci & 0x0fff,
			ethertype,
		};

		match ethertype {
			// 802.1ad, 802.1 QinQ non-standard
			0x88a8 | 0x9100 => {
				chain.push(Layer::Ieee802(tag));
				if n + 1 == N_IEEE802 {
					log::debug!("more than {N_IEEE802} stacked 802.1x tags, stopping at the last decoded tag");
					return Some(());
				}
				tpid = ethertype;
			}
			ETHERTYPE_IP | ETHERTYPE_IPV6 => {
				chain.push(Layer::Ieee802(tag));
				return ip(chain, r);
			}
			_ => return Some(()),
		}
	}

	Some(())
}

fn ip<'a>(chain: &mut Chain<'a>, r: &mut Reader<'a>) -> Option<()> {
	let rest = r.rest();
	if rest.is_empty() {
		return Some(());
	}

	match rest[0] >> 4 {
		4 => ip4(chain, r),
		6 => ip6(chain, r),
		_ => Some(()),
	}
}

fn ip4<'a>(chain: &mut Chain<'a>, r: &mut Reader<'a>) -> Option<()> {
	let hdr = (|| {
		let meta = r.need8()?;
		Some(Ip {
			v: meta >> 4,
			hl: meta & 0xf,
			tos: r.need8()?,
			len: r.need16()?,
			id: r.need16()?,
			off: r.need16()?,
			ttl: r.need8()?,
			proto: r.need8()?,
			sum: r.need16()?,
			src: r.need_array()?,
			dst: r.need_array()?,
		})
	})();
	let Some(hdr) = hdr else { return Some(()) };

	if hdr.hl < 5 {
		return Some(());
	}
	if hdr.hl > 5 && r.skip((hdr.hl as usize - 5) * 4).is_none() {
		return Some(());
	}

	// Check the reported length for missing payload.
	let data_len = match (hdr.len as usize).checked_sub(hdr.hl as usize * 4) {
		Some(data_len) if r.remaining() >= data_len => data_len,
		_ => return Some(()),
	};

	if hdr.off & 0x2000 != 0 || hdr.off & 0x1fff != 0 {
		// A fragment; no transport decode.
		let rest = r.rest();
		let padding = rest.len().saturating_sub(data_len);

		chain.push(Layer::Ip(hdr));
		chain.push(Layer::Payload(Payload {
			bytes: &rest[..rest.len() - padding],
			padding,
		}));
		return Some(());
	}

	let proto = hdr.proto;
	let declared = data_len;
	chain.push(Layer::Ip(hdr));

	transport(chain, r, proto, declared)
}

fn ip6<'a>(chain: &mut Chain<'a>, r: &mut Reader<'a>) -> Option<()> {
	let hdr = (|| {
		Some(Ip6 {
			flow: r.need32()?,
			plen: r.need16()?,
			nxt: r.need8()?,
			hlim: r.need8()?,
			src: r.need_array()?,
			dst: r.need_array()?,
			is_frag: false,
			frag_offlg: 0,
			frag_ident: 0,
			have_rtdst: false,
			rtdst: [0; 16],
		})
	})();
	let Some(mut hdr) = hdr else { return Some(()) };

	// Check the reported length for missing payload.
	if r.remaining() < hdr.plen as usize {
		return Some(());
	}

	let mut nxt = hdr.nxt;
	let mut ext_len: u8 = 0;

	while !matches!(nxt, IPPROTO_NONE | IPPROTO_GRE | IPPROTO_ICMPV6 | IPPROTO_UDP | IPPROTO_TCP) {
		// Advance to the start of the next header; not needed for the first
		// header or for the supported constructions below.
		if ext_len != 0 {
			if r.skip(ext_len as usize * 8).is_none() {
				chain.push(Layer::Ip6(hdr));
				return Some(());
			}
			ext_len = 0;
		}

		match nxt {
			IPPROTO_FRAGMENT => {
				if hdr.is_frag {
					return None;
				}
				let parsed = (|| Some((r.need8()?, r.need8()?, r.need16()?, r.need32()?)))();
				let Some((next, len, offlg, ident)) = parsed else {
					chain.push(Layer::Ip6(hdr));
					return Some(());
				};
				if len != 0 {
					return None;
				}
				nxt = next;
				hdr.frag_offlg = offlg;
				hdr.frag_ident = ident;
				hdr.is_frag = true;
			}
			IPPROTO_ROUTING => {
				if hdr.have_rtdst {
					return None;
				}
				let parsed = (|| {
					let next = r.need8()?;
					let len = r.need8()?;
					let ty = r.need8()?;
					let segleft = r.need8()?;
					r.skip(4)?;
					Some((next, len, ty, segleft))
				})();
				let Some((next, len, ty, segleft)) = parsed else {
					chain.push(Layer::Ip6(hdr));
					return Some(());
				};

				if ty == 0 && segleft > 0 {
					if len & 1 != 0 {
						return None;
					}
					let parsed = (|| {
						if len > 2 {
							r.skip(len as usize - 2)?;
						}
						r.need_array()
					})();
					let Some(rtdst) = parsed else {
						chain.push(Layer::Ip6(hdr));
						return Some(());
					};
					hdr.rtdst = rtdst;
					hdr.have_rtdst = true;
				}
				nxt = next;
				ext_len = len;
			}
			_ => {
				// Hop-by-hop, destination options, or anything else shaped
				// like a generic extension header.
				let parsed = (|| {
					let next = r.need8()?;
					let len = r.need8()?;
					r.skip(6)?;
					Some((next, len))
				})();
				let Some((next, len)) = parsed else {
					chain.push(Layer::Ip6(hdr));
					return Some(());
				};
				nxt = next;
				ext_len = len;
			}
		}
	}

	if nxt == IPPROTO_NONE || hdr.is_frag {
		let declared = hdr.plen as usize;
		let rest = r.rest();
		let padding = rest.len().saturating_sub(declared);

		chain.push(Layer::Ip6(hdr));
		chain.push(Layer::Payload(Payload {
			bytes: &rest[..rest.len() - padding],
			padding,
		}));
		return Some(());
	}

	let declared = hdr.plen as usize;
	chain.push(Layer::Ip6(hdr));

	transport(chain, r, nxt, declared)
}

/// Decode the transport layer. `declared` is the enclosing IP layer's idea
/// of how many payload bytes follow it, used for trailer padding detection.
fn transport<'a>(chain: &mut Chain<'a>, r: &mut Reader<'a>, proto: u8, declared: usize) -> Option<()> {
	match proto {
		IPPROTO_GRE => {
			let parsed = (|| Some(Gre { gre_flags: r.need16()?, ethertype: r.need16()? }))();
			if let Some(gre) = parsed {
				// Header only; RFC 1701 option fields are not walked.
				chain.push(Layer::Gre(gre));
			}
		}
		IPPROTO_ICMP => {
			let parsed = (|| Some(Icmp { ty: r.need8()?, code: r.need8()?, cksum: r.need16()? }))();
			if let Some(icmp) = parsed {
				chain.push(Layer::Icmp(icmp));
			}
		}
		IPPROTO_ICMPV6 => {
			let parsed = (|| Some(Icmp6 { ty: r.need8()?, code: r.need8()?, cksum: r.need16()? }))();
			if let Some(icmp6) = parsed {
				chain.push(Layer::Icmp6(icmp6));
			}
		}
		IPPROTO_UDP => {
			let parsed = (|| {
				Some(Udp {
					sport: r.need16()?,
					dport: r.need16()?,
					ulen: r.need16()?,
					sum: r.need16()?,
				})
			})();
			let Some(udp) = parsed else { return Some(()) };

			let rest = r.rest();
			let padding = rest.len().saturating_sub(udp.ulen as usize);

			chain.push(Layer::Udp(udp));
			chain.push(Layer::Payload(Payload {
				bytes: &rest[..rest.len() - padding],
				padding,
			}));
		}
		IPPROTO_TCP => {
			let parsed = (|| {
				let mut tcp = Tcp {
					sport: r.need16()?,
					dport: r.need16()?,
					seq: r.need32()?,
					ack: r.need32()?,
					off: 0,
					x2: 0,
					flags: 0,
					win: 0,
					sum: 0,
					urp: 0,
					opts: [0; 40],
					opts_len: 0,
				};
				let meta = r.need8()?;
				tcp.off = meta >> 4;
				tcp.x2 = meta & 0xf;
				tcp.flags = r.need8()?;
				tcp.win = r.need16()?;
				tcp.sum = r.need16()?;
				tcp.urp = r.need16()?;
				if tcp.off > 5 {
					tcp.opts_len = (tcp.off - 5) * 4;
					let opts = r.need_bytes(tcp.opts_len as usize)?;
					tcp.opts[..opts.len()].copy_from_slice(opts);
				}
				Some(tcp)
			})();
			let Some(tcp) = parsed else { return Some(()) };

			let rest = r.rest();
			let padding = rest.len().saturating_sub(declared);

			chain.push(Layer::Tcp(tcp));
			chain.push(Layer::Payload(Payload {
				bytes: &rest[..rest.len() - padding],
				padding,
			}));
		}
		_ => {}
	}

	Some(())
}

#[cfg(test)]
mod tests {
	use super::*;

	fn pcap(linktype: u32, bytes: &[u8]) -> Pcap<'_> {
		Pcap {
			ts: Ts::default(),
			caplen: bytes.len() as u32,
			origlen: bytes.len() as u32,
			snaplen: 0x40000,
			linktype,
			is_swapped: false,
			bytes,
		}
	}

	fn ipv4_udp(payload: &[u8], ulen_extra: u16) -> Vec<u8> {
		let udp_len = 8 + payload.len() as u16;
		let total = 20 + udp_len;

		let mut pkt = Vec::new();
		pkt.push(0x45); // v4, hl 5
		pkt.push(0);
		pkt.extend_from_slice(&total.to_be_bytes());
		pkt.extend_from_slice(&[0, 0, 0, 0]); // id, off
		pkt.push(64); // ttl
		pkt.push(IPPROTO_UDP);
		pkt.extend_from_slice(&[0, 0]); // sum
		pkt.extend_from_slice(&[10, 0, 0, 1]);
		pkt.extend_from_slice(&[10, 0, 0, 2]);
		pkt.extend_from_slice(&1234u16.to_be_bytes());
		pkt.extend_from_slice(&53u16.to_be_bytes());
		pkt.extend_from_slice(&(udp_len + ulen_extra).to_be_bytes());
		pkt.extend_from_slice(&[0, 0]);
		pkt.extend_from_slice(payload);
		pkt
	}

	fn ether(ethertype: u16, inner: &[u8]) -> Vec<u8> {
		let mut pkt = Vec::new();
		pkt.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
		pkt.extend_from_slice(&[7, 8, 9, 10, 11, 12]);
		pkt.extend_from_slice(&ethertype.to_be_bytes());
		pkt.extend_from_slice(inner);
		pkt
	}

	#[test]
	fn ether_ipv4_udp_payload() {
		let pkt = ether(ETHERTYPE_IP, &ipv4_udp(b"querybytes", 0));
		let rec = pcap(linktype::EN10MB, &pkt);

		let chain = decode(&rec).unwrap();

		let kinds = chain.layers().iter().map(Layer::kind).collect::<Vec<_>>();
		assert_eq!(kinds, [Kind::Pcap, Kind::Ether, Kind::Ip, Kind::Udp, Kind::Payload]);

		let Some(Layer::Udp(udp)) = chain.find(Kind::Udp) else { unreachable!() };
		assert_eq!((udp.sport, udp.dport), (1234, 53));

		let payload = chain.payload().unwrap();
		assert_eq!(payload.bytes, b"querybytes");
		assert_eq!(payload.padding, 0);
	}

	#[test]
	fn ipv4_declared_len_invariant() {
		// Invariant: for unfragmented v4, the payload length plus the
		// transport header equals iphdr.len - hl * 4.
		let pkt = ipv4_udp(b"12345678", 0);
		let rec = pcap(linktype::RAW, &pkt);

		let chain = decode(&rec).unwrap();

		let Some(Layer::Ip(ip)) = chain.find(Kind::Ip) else { unreachable!() };
		assert_eq!(ip.off & 0x3fff, 0);
		let payload = chain.payload().unwrap();
		assert_eq!(payload.bytes.len() + 8, (ip.len - ip.hl as u16 * 4) as usize);
	}

	#[test]
	fn ethernet_trailer_is_padding() {
		// A UDP length shorter than the captured remainder marks the excess
		// as padding.
		let mut ip = ipv4_udp(b"abcdWXYZ", 0);
		let udp_len_at = 20 + 4;
		ip[udp_len_at..udp_len_at + 2].copy_from_slice(&4u16.to_be_bytes());

		let rec = pcap(linktype::RAW, &ip);
		let chain = decode(&rec).unwrap();

		let payload = chain.payload().unwrap();
		assert_eq!(payload.padding, 4);
		assert_eq!(payload.bytes, b"abcd");
	}

	#[test]
	fn ipv4_fragment_stops_at_payload() {
		let mut pkt = ipv4_udp(b"fragmented", 0);
		pkt[6..8].copy_from_slice(&0x2000u16.to_be_bytes()); // MF

		let rec = pcap(linktype::RAW, &pkt);
		let chain = decode(&rec).unwrap();

		let kinds = chain.layers().iter().map(Layer::kind).collect::<Vec<_>>();
		assert_eq!(kinds, [Kind::Pcap, Kind::Ip, Kind::Payload]);
	}

	#[test]
	fn truncated_header_ends_at_enclosing_layer() {
		let pkt = ether(ETHERTYPE_IP, &[0x45, 0]);
		let rec = pcap(linktype::EN10MB, &pkt);

		let chain = decode(&rec).unwrap();
		assert_eq!(chain.innermost().unwrap().kind(), Kind::Ether);
	}

	#[test]
	fn unknown_ethertype_ends_at_pcap() {
		let pkt = ether(0x0806, &[0; 28]); // ARP
		let rec = pcap(linktype::EN10MB, &pkt);

		let chain = decode(&rec).unwrap();
		assert_eq!(chain.innermost().unwrap().kind(), Kind::Pcap);
	}

	#[test]
	fn vlan_tags_nest() {
		let mut inner = Vec::new();
		// 802.1ad outer tag, then a QinQ inner tag, then IPv4.
		inner.extend_from_slice(&0x0064u16.to_be_bytes());
		inner.extend_from_slice(&0x9100u16.to_be_bytes());
		inner.extend_from_slice(&0x0032u16.to_be_bytes());
		inner.extend_from_slice(&ETHERTYPE_IP.to_be_bytes());
		inner.extend_from_slice(&ipv4_udp(b"tagged", 0));
		let pkt = ether(0x88a8, &inner);

		let rec = pcap(linktype::EN10MB, &pkt);
		let chain = decode(&rec).unwrap();

		let kinds = chain.layers().iter().map(Layer::kind).collect::<Vec<_>>();
		assert_eq!(
			kinds,
			[Kind::Pcap, Kind::Ether, Kind::Ieee802, Kind::Ieee802, Kind::Ip, Kind::Udp, Kind::Payload]
		);

		let Some(Layer::Ieee802(tag)) = chain.find(Kind::Ieee802) else { unreachable!() };
		assert_eq!(tag.vid, 0x32);
		assert_eq!(tag.ethertype, ETHERTYPE_IP);
	}

	fn ipv6(nxt: u8, ext_and_payload: &[u8]) -> Vec<u8> {
		let mut pkt = Vec::new();
		pkt.extend_from_slice(&0x6000_0000u32.to_be_bytes());
		pkt.extend_from_slice(&(ext_and_payload.len() as u16).to_be_bytes());
		pkt.push(nxt);
		pkt.push(64);
		pkt.extend_from_slice(&[0x20, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
		pkt.extend_from_slice(&[0x20, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);
		pkt.extend_from_slice(ext_and_payload);
		pkt
	}

	#[test]
	fn ipv6_hop_by_hop_then_udp() {
		let mut inner = Vec::new();
		// Hop-by-hop: next = UDP, len 0 (8 bytes total).
		inner.push(IPPROTO_UDP);
		inner.push(0);
		inner.extend_from_slice(&[0; 6]);
		inner.extend_from_slice(&1u16.to_be_bytes());
		inner.extend_from_slice(&53u16.to_be_bytes());
		inner.extend_from_slice(&11u16.to_be_bytes()); // 8 + 3
		inner.extend_from_slice(&[0, 0]);
		inner.extend_from_slice(b"abc");

		let pkt = ipv6(0, &inner);
		let rec = pcap(linktype::RAW, &pkt);
		let chain = decode(&rec).unwrap();

		let kinds = chain.layers().iter().map(Layer::kind).collect::<Vec<_>>();
		assert_eq!(kinds, [Kind::Pcap, Kind::Ip6, Kind::Udp, Kind::Payload]);
		assert_eq!(chain.payload().unwrap().bytes, b"abc");
	}

	#[test]
	fn ipv6_fragment_stops_at_payload() {
		let mut inner = Vec::new();
		// Fragment header: next = UDP, reserved, offset 8, ident.
		inner.push(IPPROTO_UDP);
		inner.push(0);
		inner.extend_from_slice(&8u16.to_be_bytes());
		inner.extend_from_slice(&0xdeadbeefu32.to_be_bytes());
		inner.extend_from_slice(b"fragment payload");

		let pkt = ipv6(IPPROTO_FRAGMENT, &inner);
		let rec = pcap(linktype::RAW, &pkt);
		let chain = decode(&rec).unwrap();

		let Some(Layer::Ip6(ip6)) = chain.find(Kind::Ip6) else { unreachable!() };
		assert!(ip6.is_frag);
		assert_eq!(ip6.frag_ident, 0xdeadbeef);
		assert_eq!(chain.innermost().unwrap().kind(), Kind::Payload);
		assert!(chain.find(Kind::Udp).is_none());
	}

	#[test]
	fn ipv6_double_fragment_discards() {
		let mut inner = Vec::new();
		inner.push(IPPROTO_FRAGMENT);
		inner.push(0);
		inner.extend_from_slice(&0u16.to_be_bytes());
		inner.extend_from_slice(&1u32.to_be_bytes());
		inner.push(IPPROTO_UDP);
		inner.push(0);
		inner.extend_from_slice(&0u16.to_be_bytes());
		inner.extend_from_slice(&2u32.to_be_bytes());

		let pkt = ipv6(IPPROTO_FRAGMENT, &inner);
		let rec = pcap(linktype::RAW, &pkt);
		assert!(decode(&rec).is_none());
	}

	#[test]
	fn null_family_dispatch() {
		let mut pkt = 2u32.to_be_bytes().to_vec();
		pkt.extend_from_slice(&ipv4_udp(b"loopback", 0));

		let rec = pcap(linktype::NULL, &pkt);
		let chain = decode(&rec).unwrap();

		let kinds = chain.layers().iter().map(Layer::kind).collect::<Vec<_>>();
		assert_eq!(kinds, [Kind::Pcap, Kind::Null, Kind::Ip, Kind::Udp, Kind::Payload]);
	}

	#[test]
	fn linux_sll_ipv4() {
		let mut pkt = Vec::new();
		pkt.extend_from_slice(&0u16.to_be_bytes()); // packet type
		pkt.extend_from_slice(&1u16.to_be_bytes()); // ARPHRD_ETHER
		pkt.extend_from_slice(&6u16.to_be_bytes());
		pkt.extend_from_slice(&[1, 2, 3, 4, 5, 6, 0, 0]);
		pkt.extend_from_slice(&ETHERTYPE_IP.to_be_bytes());
		pkt.extend_from_slice(&ipv4_udp(b"cooked", 0));

		let rec = pcap(linktype::LINUX_SLL, &pkt);
		let chain = decode(&rec).unwrap();

		let kinds = chain.layers().iter().map(Layer::kind).collect::<Vec<_>>();
		assert_eq!(kinds, [Kind::Pcap, Kind::LinuxSll, Kind::Ip, Kind::Udp, Kind::Payload]);
	}

	#[test]
	fn tcp_options_decoded() {
		let payload = b"tcp payload";
		let total = 20 + 24 + payload.len() as u16;

		let mut pkt = Vec::new();
		pkt.push(0x45);
		pkt.push(0);
		pkt.extend_from_slice(&total.to_be_bytes());
		pkt.extend_from_slice(&[0, 0, 0, 0]);
		pkt.push(64);
		pkt.push(IPPROTO_TCP);
		pkt.extend_from_slice(&[0, 0]);
		pkt.extend_from_slice(&[10, 0, 0, 1]);
		pkt.extend_from_slice(&[10, 0, 0, 2]);

		pkt.extend_from_slice(&40000u16.to_be_bytes());
		pkt.extend_from_slice(&53u16.to_be_bytes());
		pkt.extend_from_slice(&1u32.to_be_bytes());
		pkt.extend_from_slice(&2u32.to_be_bytes());
		pkt.push(6 << 4); // off 6: one option word
		pkt.push(0x18); // PSH|ACK
		pkt.extend_from_slice(&0xffffu16.to_be_bytes());
		pkt.extend_from_slice(&[0, 0, 0, 0]);
		pkt.extend_from_slice(&[2, 4, 5, 0xb4]); // MSS 1460
		pkt.extend_from_slice(payload);

		let rec = pcap(linktype::RAW, &pkt);
		let chain = decode(&rec).unwrap();

		let Some(Layer::Tcp(tcp)) = chain.find(Kind::Tcp) else { unreachable!() };
		assert_eq!(tcp.off, 6);
		assert_eq!(tcp.opts_len, 4);
		assert_eq!(&tcp.opts[..4], &[2, 4, 5, 0xb4]);
		assert_eq!(chain.payload().unwrap().bytes, payload);
	}
}
