//! The DNS wire parser. Parsing is incremental: `parse_header` first, then
//! `parse_q` once per question and `parse_rr` once per resource record in
//! any section. Every decoded field sets a presence bit, so a truncated
//! capture degrades into a partial parse that is still observable. Labels,
//! questions and records are written into caller-supplied storage.

use bilge::prelude::*;

/// Parse failures that the caller decides how to handle; neither is fatal.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DnsError {
	/// A read would cross the end of the captured buffer, or RDATA was
	/// overrun.
	Malformed,
	/// The caller's label array is too small for the name.
	NeedLabels,
}

/// Record type codes that matter to the parser: the types whose RDATA
/// embeds domain names, plus a few common ones.
pub mod ty {
	pub const A: u16 = 1;
	pub const NS: u16 = 2;
	pub const MD: u16 = 3;
	pub const MF: u16 = 4;
	pub const CNAME: u16 = 5;
	pub const SOA: u16 = 6;
	pub const MB: u16 = 7;
	pub const MG: u16 = 8;
	pub const MR: u16 = 9;
	pub const PTR: u16 = 12;
	pub const MINFO: u16 = 14;
	pub const MX: u16 = 15;
	pub const RP: u16 = 17;
	pub const AFSDB: u16 = 18;
	pub const RT: u16 = 21;
	pub const SIG: u16 = 24;
	pub const PX: u16 = 26;
	pub const AAAA: u16 = 28;
	pub const NXT: u16 = 30;
	pub const SRV: u16 = 33;
	pub const NAPTR: u16 = 35;
	pub const KX: u16 = 36;
	pub const DNAME: u16 = 39;
	pub const OPT: u16 = 41;
	pub const RRSIG: u16 = 46;
	pub const NSEC: u16 = 47;
	pub const HIP: u16 = 55;
	pub const TALINK: u16 = 58;
	pub const LP: u16 = 107;
	pub const TKEY: u16 = 249;
	pub const TSIG: u16 = 250;
}

/// Response codes, including the extended TSIG/TKEY range.
pub mod rcode {
	pub const NOERROR: u8 = 0;
	pub const FORMERR: u8 = 1;
	pub const SERVFAIL: u8 = 2;
	pub const NXDOMAIN: u8 = 3;
	pub const NOTIMP: u8 = 4;
	pub const REFUSED: u8 = 5;
	pub const YXDOMAIN: u8 = 6;
	pub const YXRRSET: u8 = 7;
	pub const NXRRSET: u8 = 8;
	pub const NOTAUTH: u8 = 9;
	pub const NOTZONE: u8 = 10;
	pub const BADVERS: u8 = 16;
	pub const BADKEY: u8 = 17;
	pub const BADTIME: u8 = 18;
	pub const BADMODE: u8 = 19;
	pub const BADNAME: u8 = 20;
	pub const BADALG: u8 = 21;
	pub const BADTRUNC: u8 = 22;
	pub const BADCOOKIE: u8 = 23;
}

/// One element of a domain name. A label is either terminal (the zero
/// byte), a compression pointer into the packet, an extension-bit marker,
/// or a literal fragment whose `length` bytes live at `offset`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Label {
	pub is_end: bool,
	pub have_length: bool,
	pub have_offset: bool,
	pub have_extension_bits: bool,
	pub have_dn: bool,
	pub extension_bits: u8,
	pub length: u8,
	pub offset: u16,
}

#[derive(Clone, Copy, Default, Debug)]
pub struct Question {
	/// Number of labels consumed from the caller's array, terminal included.
	pub labels: usize,
	pub qtype: u16,
	pub qclass: u16,
	pub have_type: bool,
	pub have_class: bool,
}

#[derive(Clone, Copy, Default, Debug)]
pub struct Rr {
	/// Number of name labels consumed, terminal included.
	pub labels: usize,
	/// Number of further labels consumed for domain names inside RDATA.
	pub rdata_labels: usize,
	pub ty: u16,
	pub rclass: u16,
	pub ttl: u32,
	pub rdlength: u16,
	pub rdata_offset: usize,
	pub padding_offset: usize,
	pub padding_length: usize,
	pub have_type: bool,
	pub have_class: bool,
	pub have_ttl: bool,
	pub have_rdlength: bool,
	pub have_rdata: bool,
	pub have_rdata_labels: bool,
	pub have_padding: bool,
}

/// The first flags byte of the header.
#[bitsize(8)]
#[derive(FromBits)]
struct FlagsLow {
	/// Recursion Desired - this bit may be set in a query and is copied into the response.
	rd: bool,
	/// TrunCation - specifies that this message was truncated due to length greater than that permitted on the transmission channel.
	tc: bool,
	/// Authoritative Answer - this bit is valid in responses, and specifies that the responding name server is an authority for the domain name in question section.
	aa: bool,
	/// A four bit field that specifies kind of query in this message.
	opcode: u4,
	/// A one bit field that specifies whether this message is a query (0), or a response (1).
	qr: bool,
}

/// The second flags byte of the header.
#[bitsize(8)]
#[derive(FromBits)]
struct FlagsHigh {
	/// Response code - this 4 bit field is set as part of responses.
	rcode: u4,
	/// Checking Disabled (DNSSEC).
	cd: bool,
	/// Authentic Data (DNSSEC).
	ad: bool,
	/// Reserved for future use.
	z: bool,
	/// Recursion Available - this bit is set or cleared in a response.
	ra: bool,
}

/// A DNS message view over a transport payload, with a parse cursor and
/// per-field presence bits.
#[derive(Clone, Debug)]
pub struct Dns<'a> {
	payload: &'a [u8],
	at: usize,

	/// Parse a 16-bit length prefix before the header (TCP framing).
	pub includes_dnslen: bool,

	pub dnslen: u16,
	pub id: u16,
	pub qr: bool,
	pub opcode: u8,
	pub aa: bool,
	pub tc: bool,
	pub rd: bool,
	pub ra: bool,
	pub z: bool,
	pub ad: bool,
	pub cd: bool,
	pub rcode: u8,
	pub qdcount: u16,
	pub ancount: u16,
	pub nscount: u16,
	pub arcount: u16,

	pub have_dnslen: bool,
	pub have_id: bool,
	pub have_qr: bool,
	pub have_opcode: bool,
	pub have_aa: bool,
	pub have_tc: bool,
	pub have_rd: bool,
	pub have_ra: bool,
	pub have_z: bool,
	pub have_ad: bool,
	pub have_cd: bool,
	pub have_rcode: bool,
	pub have_qdcount: bool,
	pub have_ancount: bool,
	pub have_nscount: bool,
	pub have_arcount: bool,
}

impl<'a> Dns<'a> {
	pub fn new(payload: &'a [u8]) -> Self {
		Self {
			payload,
			at: 0,
			includes_dnslen: false,
			dnslen: 0,
			id: 0,
			qr: false,
			opcode: 0,
			aa: false,
			tc: false,
			rd: false,
			ra: false,
			z: false,
			ad: false,
			cd: false,
			rcode: 0,
			qdcount: 0,
			ancount: 0,
			nscount: 0,
			arcount: 0,
			have_dnslen: false,
			have_id: false,
			have_qr: false,
			have_opcode: false,
			have_aa: false,
			have_tc: false,
			have_rd: false,
			have_ra: false,
			have_z: false,
			have_ad: false,
			have_cd: false,
			have_rcode: false,
			have_qdcount: false,
			have_ancount: false,
			have_nscount: false,
			have_arcount: false,
		}
	}

	/// A view over a TCP-framed message that starts with the 2-byte length.
	pub fn with_dnslen(payload: &'a [u8]) -> Self {
		let mut dns = Self::new(payload);
		dns.includes_dnslen = true;
		dns
	}

	/// The parse cursor, as an offset into the payload.
	pub fn offset(&self) -> usize {
		self.at
	}

	fn left(&self) -> usize {
		self.payload.len() - self.at
	}

	fn need8(&mut self) -> Option<u8> {
		let v = *self.payload.get(self.at)?;
		self.at += 1;
		Some(v)
	}

	fn need16(&mut self) -> Option<u16> {
		let bytes = self.payload.get(self.at..self.at + 2)?;
		self.at += 2;
		Some(u16::from_be_bytes(bytes.try_into().unwrap()))
	}

	fn need32(&mut self) -> Option<u32> {
		let bytes = self.payload.get(self.at..self.at + 4)?;
		self.at += 4;
		Some(u32::from_be_bytes(bytes.try_into().unwrap()))
	}

	fn skip(&mut self, n: usize) -> Option<()> {
		if self.left() < n {
			return None;
		}
		self.at += n;
		Some(())
	}

	/// Extract the 12-byte header, optionally preceded by the TCP length
	/// prefix. Each field read sets its presence bit, so the partial state
	/// survives a truncated buffer.
	pub fn parse_header(&mut self) -> Result<(), DnsError> {
		if self.payload.is_empty() {
			return Err(DnsError::Malformed);
		}

		if self.includes_dnslen {
			self.dnslen = self.need16().ok_or(DnsError::Malformed)?;
			self.have_dnslen = true;
		}

		self.id = self.need16().ok_or(DnsError::Malformed)?;
		self.have_id = true;

		let low = FlagsLow::from(self.need8().ok_or(DnsError::Malformed)?);
		self.qr = low.qr();
		self.opcode = low.opcode().value();
		self.aa = low.aa();
		self.tc = low.tc();
		self.rd = low.rd();
		self.have_qr = true;
		self.have_opcode = true;
		self.have_aa = true;
		self.have_tc = true;
		self.have_rd = true;

		let high = FlagsHigh::from(self.need8().ok_or(DnsError::Malformed)?);
		self.ra = high.ra();
		self.z = high.z();
		self.ad = high.ad();
		self.cd = high.cd();
		self.rcode = high.rcode().value();
		self.have_ra = true;
		self.have_z = true;
		self.have_ad = true;
		self.have_cd = true;
		self.have_rcode = true;

		self.qdcount = self.need16().ok_or(DnsError::Malformed)?;
		self.have_qdcount = true;
		self.ancount = self.need16().ok_or(DnsError::Malformed)?;
		self.have_ancount = true;
		self.nscount = self.need16().ok_or(DnsError::Malformed)?;
		self.have_nscount = true;
		self.arcount = self.need16().ok_or(DnsError::Malformed)?;
		self.have_arcount = true;

		Ok(())
	}

	/// Regenerate the 12 header bytes from the parsed fields.
	pub fn write_header(&self) -> [u8; 12] {
		let mut out = [0; 12];
		out[..2].copy_from_slice(&self.id.to_be_bytes());
		out[2] = FlagsLow::new(self.rd, self.tc, self.aa, u4::new(self.opcode), self.qr).into();
		out[3] = FlagsHigh::new(u4::new(self.rcode), self.cd, self.ad, self.z, self.ra).into();
		out[4..6].copy_from_slice(&self.qdcount.to_be_bytes());
		out[6..8].copy_from_slice(&self.ancount.to_be_bytes());
		out[8..10].copy_from_slice(&self.nscount.to_be_bytes());
		out[10..12].copy_from_slice(&self.arcount.to_be_bytes());
		out
	}

	/// Parse one label sequence into `out`. Returns the number of non-
	/// terminal labels written and whether a terminating label (end,
	/// pointer or extension bits) was recorded at that index.
	fn parse_labels(&mut self, out: &mut [Label]) -> (usize, bool) {
		let mut n = 0;

		while self.left() > 0 && n < out.len() {
			let l = &mut out[n];
			*l = Label::default();

			let Some(length) = self.need8() else { break };
			l.length = length;

			if length & 0xc0 == 0xc0 {
				// A 14-bit compression pointer; terminal for this sequence.
				let Some(low) = self.need8() else { break };
				l.offset = ((length as u16 & 0x3f) << 8) | low as u16;
				l.have_offset = true;
				return (n, true);
			} else if length & 0xc0 != 0 {
				l.extension_bits = length >> 6;
				l.have_extension_bits = true;
				return (n, true);
			} else if length != 0 {
				l.have_length = true;
				l.offset = (self.at - 1) as u16;
				if self.skip(length as usize).is_none() {
					break;
				}
				l.have_dn = true;
			} else {
				l.is_end = true;
				return (n, true);
			}

			n += 1;
		}

		(n, false)
	}

	fn name(&mut self, labels: &mut [Label]) -> Result<usize, DnsError> {
		let (used, terminated) = self.parse_labels(labels);

		if used >= labels.len() {
			log::warn!("need more labels, aborting DNS parsing");
			return Err(DnsError::NeedLabels);
		}
		if !terminated {
			return Err(DnsError::Malformed);
		}

		// Count the terminal label too.
		Ok(used + 1)
	}

	/// Parse one question into `q`, writing its name into `labels`.
	pub fn parse_q(&mut self, q: &mut Question, labels: &mut [Label]) -> Result<(), DnsError> {
		assert!(!labels.is_empty(), "labels is zero");

		*q = Question::default();
		q.labels = self.name(labels)?;

		q.qtype = self.need16().ok_or(DnsError::Malformed)?;
		q.have_type = true;

		q.qclass = self.need16().ok_or(DnsError::Malformed)?;
		q.have_class = true;

		Ok(())
	}

	/// How many domain-name sets this record type embeds in its RDATA.
	fn rdata_label_sets(ty: u16) -> usize {
		match ty {
			ty::NS | ty::MD | ty::MF | ty::CNAME | ty::MB | ty::MG | ty::MR | ty::PTR | ty::NXT | ty::DNAME | ty::NSEC | ty::TKEY | ty::TSIG => 1,
			ty::SOA | ty::MINFO | ty::RP | ty::TALINK => 2,
			ty::MX | ty::AFSDB | ty::RT | ty::KX | ty::LP => 1,
			ty::PX => 2,
			ty::SIG | ty::RRSIG => 1,
			ty::SRV => 1,
			ty::NAPTR => 1,
			ty::HIP => 1,
			_ => 0,
		}
	}

	/// Parse one resource record into `rr`, writing its name and any RDATA
	/// names into `labels`.
	pub fn parse_rr(&mut self, rr: &mut Rr, labels: &mut [Label]) -> Result<(), DnsError> {
		assert!(!labels.is_empty(), "labels is zero");

		*rr = Rr::default();
		rr.labels = self.name(labels)?;

		rr.ty = self.need16().ok_or(DnsError::Malformed)?;
		rr.have_type = true;

		rr.rclass = self.need16().ok_or(DnsError::Malformed)?;
		rr.have_class = true;

		rr.ttl = self.need32().ok_or(DnsError::Malformed)?;
		rr.have_ttl = true;

		rr.rdlength = self.need16().ok_or(DnsError::Malformed)?;
		rr.have_rdlength = true;

		rr.rdata_offset = self.at;
		let rdata_end = rr.rdata_offset + rr.rdlength as usize;

		let mut label_sets = Self::rdata_label_sets(rr.ty);
		if label_sets == 0 {
			self.skip(rr.rdlength as usize).ok_or(DnsError::Malformed)?;
			rr.have_rdata = true;
			return Ok(());
		}

		// Skip the type-specific fixed prefix before the embedded names.
		match rr.ty {
			ty::MX | ty::AFSDB | ty::RT | ty::KX | ty::LP | ty::PX => {
				self.skip(2).ok_or(DnsError::Malformed)?;
			}
			ty::SIG | ty::RRSIG => {
				self.skip(18).ok_or(DnsError::Malformed)?;
			}
			ty::SRV => {
				self.skip(6).ok_or(DnsError::Malformed)?;
			}
			ty::NAPTR => {
				// Order and preference, then three counted strings.
				self.skip(4).ok_or(DnsError::Malformed)?;
				for _ in 0..3 {
					let len = self.need8().ok_or(DnsError::Malformed)?;
					self.skip(len as usize).ok_or(DnsError::Malformed)?;
				}
			}
			ty::HIP => {
				let hit_len = self.need8().ok_or(DnsError::Malformed)?;
				self.skip(1).ok_or(DnsError::Malformed)?;
				let pk_len = self.need16().ok_or(DnsError::Malformed)?;
				self.skip(hit_len as usize).ok_or(DnsError::Malformed)?;
				self.skip(pk_len as usize).ok_or(DnsError::Malformed)?;

				if self.at >= rdata_end {
					label_sets = 0;
				}
			}
			_ => {}
		}

		while label_sets > 0 {
			let used = {
				let out = &mut labels[rr.labels + rr.rdata_labels..];
				if out.is_empty() {
					log::warn!("need more labels, aborting DNS parsing");
					return Err(DnsError::NeedLabels);
				}
				let (used, terminated) = self.parse_labels(out);
				if used >= out.len() {
					log::warn!("need more labels, aborting DNS parsing");
					return Err(DnsError::NeedLabels);
				}
				if !terminated {
					return Err(DnsError::Malformed);
				}
				used + 1
			};
			rr.rdata_labels += used;
			rr.have_rdata_labels = true;

			// HIP carries rendezvous servers until RDATA is exhausted.
			if rr.ty == ty::HIP && self.at < rdata_end {
				continue;
			}

			label_sets -= 1;
		}

		if self.at < rdata_end {
			// Unconsumed RDATA is recorded as padding; the flag stays unset
			// until the tail of every record type is fully understood.
			rr.padding_offset = self.at;
			rr.padding_length = rr.rdlength as usize - (rr.padding_offset - rr.rdata_offset);
			self.skip(rr.padding_length).ok_or(DnsError::Malformed)?;
		} else if self.at > rdata_end {
			return Err(DnsError::Malformed);
		}
		rr.have_rdata = true;

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn name(parts: &[&str]) -> Vec<u8> {
		let mut out = Vec::new();
		for part in parts {
			out.push(part.len() as u8);
			out.extend_from_slice(part.as_bytes());
		}
		out.push(0);
		out
	}

	fn header(id: u16, flags: [u8; 2], counts: [u16; 4]) -> Vec<u8> {
		let mut out = Vec::new();
		out.extend_from_slice(&id.to_be_bytes());
		out.extend_from_slice(&flags);
		for count in counts {
			out.extend_from_slice(&count.to_be_bytes());
		}
		out
	}

	#[test]
	fn header_roundtrip() {
		// id 0x1234, response, opcode 0, aa, rd, ra, rcode NXDOMAIN.
		let msg = header(0x1234, [0x85, 0x83], [1, 0, 1, 0]);

		let mut dns = Dns::new(&msg);
		dns.parse_header().unwrap();

		assert!(dns.have_id && dns.have_rcode && dns.have_arcount);
		assert_eq!(dns.id, 0x1234);
		assert!(dns.qr && dns.aa && dns.rd && dns.ra);
		assert!(!dns.tc && !dns.z && !dns.ad && !dns.cd);
		assert_eq!(dns.rcode, rcode::NXDOMAIN);
		assert_eq!((dns.qdcount, dns.ancount, dns.nscount, dns.arcount), (1, 0, 1, 0));

		assert_eq!(dns.write_header(), msg[..12]);
	}

	#[test]
	fn empty_payload_is_malformed() {
		let mut dns = Dns::new(&[]);
		assert_eq!(dns.parse_header(), Err(DnsError::Malformed));
		assert!(!dns.have_id);
	}

	#[test]
	fn truncated_header_keeps_presence_bits() {
		let msg = header(7, [0x01, 0x20], [1, 2, 3, 4]);

		let mut dns = Dns::new(&msg[..6]);
		assert_eq!(dns.parse_header(), Err(DnsError::Malformed));
		assert!(dns.have_id && dns.have_rd && dns.have_rcode);
		assert!(!dns.have_qdcount);
		assert_eq!(dns.id, 7);
	}

	#[test]
	fn tcp_framing_length() {
		let mut msg = 12u16.to_be_bytes().to_vec();
		msg.extend_from_slice(&header(1, [0, 0], [0, 0, 0, 0]));

		let mut dns = Dns::with_dnslen(&msg);
		dns.parse_header().unwrap();
		assert!(dns.have_dnslen);
		assert_eq!(dns.dnslen, 12);
		assert_eq!(dns.id, 1);
	}

	#[test]
	fn question_with_literal_name() {
		let mut msg = header(1, [0, 0], [1, 0, 0, 0]);
		msg.extend_from_slice(&name(&["example", "com"]));
		msg.extend_from_slice(&1u16.to_be_bytes());
		msg.extend_from_slice(&1u16.to_be_bytes());

		let mut dns = Dns::new(&msg);
		dns.parse_header().unwrap();

		let mut q = Question::default();
		let mut labels = [Label::default(); 8];
		dns.parse_q(&mut q, &mut labels).unwrap();

		assert_eq!(q.labels, 3);
		assert!(labels[0].have_dn && labels[1].have_dn && labels[2].is_end);
		assert_eq!(labels[0].length, 7);
		// The offset points at the length byte of the fragment.
		assert_eq!(labels[0].offset, 12);
		assert_eq!(&msg[labels[0].offset as usize + 1..][..7], b"example");
		assert_eq!((q.qtype, q.qclass), (ty::A, 1));
	}

	#[test]
	fn second_question_compressed_to_offset_12() {
		let mut msg = header(1, [0, 0], [2, 0, 0, 0]);
		msg.extend_from_slice(&name(&["example", "com"]));
		msg.extend_from_slice(&ty::A.to_be_bytes());
		msg.extend_from_slice(&1u16.to_be_bytes());
		// Second question: a bare pointer back to the first name.
		msg.extend_from_slice(&[0xc0, 12]);
		msg.extend_from_slice(&ty::AAAA.to_be_bytes());
		msg.extend_from_slice(&1u16.to_be_bytes());

		let mut dns = Dns::new(&msg);
		dns.parse_header().unwrap();

		let mut q = Question::default();
		let mut labels = [Label::default(); 8];
		dns.parse_q(&mut q, &mut labels).unwrap();
		dns.parse_q(&mut q, &mut labels).unwrap();

		assert_eq!(q.labels, 1);
		assert!(labels[0].have_offset);
		assert_eq!(labels[0].offset, 12);
		assert!(q.have_type && q.have_class);
		assert_eq!(q.qtype, ty::AAAA);
	}

	#[test]
	fn terminal_label_is_exclusive() {
		// Invariant: a parsed sequence ends in exactly one of is_end,
		// have_offset or have_extension_bits.
		for tail in [vec![0u8], vec![0xc0, 12], vec![0x40]] {
			let mut msg = header(1, [0, 0], [1, 0, 0, 0]);
			msg.extend_from_slice(&[3]);
			msg.extend_from_slice(b"www");
			msg.extend_from_slice(&tail);
			msg.extend_from_slice(&ty::A.to_be_bytes());
			msg.extend_from_slice(&1u16.to_be_bytes());

			let mut dns = Dns::new(&msg);
			dns.parse_header().unwrap();

			let mut q = Question::default();
			let mut labels = [Label::default(); 8];
			dns.parse_q(&mut q, &mut labels).unwrap();

			let terminal = labels[q.labels - 1];
			let set = [terminal.is_end, terminal.have_offset, terminal.have_extension_bits];
			assert_eq!(set.iter().filter(|&&b| b).count(), 1, "tail {tail:?}");
		}
	}

	#[test]
	fn label_array_too_small() {
		let mut msg = header(1, [0, 0], [1, 0, 0, 0]);
		msg.extend_from_slice(&name(&["a", "b", "c", "d"]));
		msg.extend_from_slice(&ty::A.to_be_bytes());
		msg.extend_from_slice(&1u16.to_be_bytes());

		let mut dns = Dns::new(&msg);
		dns.parse_header().unwrap();

		let mut q = Question::default();
		let mut labels = [Label::default(); 3];
		assert_eq!(dns.parse_q(&mut q, &mut labels), Err(DnsError::NeedLabels));
	}

	#[test]
	fn truncated_name_is_malformed() {
		let mut msg = header(1, [0, 0], [1, 0, 0, 0]);
		msg.extend_from_slice(&[7]);
		msg.extend_from_slice(b"exa"); // cut mid-label

		let mut dns = Dns::new(&msg);
		dns.parse_header().unwrap();

		let mut q = Question::default();
		let mut labels = [Label::default(); 8];
		assert_eq!(dns.parse_q(&mut q, &mut labels), Err(DnsError::Malformed));
	}

	fn rr_message(ty: u16, rdata: &[u8]) -> Vec<u8> {
		let mut msg = header(1, [0x80, 0], [0, 1, 0, 0]);
		msg.extend_from_slice(&name(&["example", "com"]));
		msg.extend_from_slice(&ty.to_be_bytes());
		msg.extend_from_slice(&1u16.to_be_bytes());
		msg.extend_from_slice(&300u32.to_be_bytes());
		msg.extend_from_slice(&(rdata.len() as u16).to_be_bytes());
		msg.extend_from_slice(rdata);
		msg
	}

	#[test]
	fn rr_opaque_rdata() {
		let msg = rr_message(ty::A, &[192, 0, 2, 1]);

		let mut dns = Dns::new(&msg);
		dns.parse_header().unwrap();

		let mut rr = Rr::default();
		let mut labels = [Label::default(); 8];
		dns.parse_rr(&mut rr, &mut labels).unwrap();

		assert_eq!(rr.ty, ty::A);
		assert_eq!(rr.ttl, 300);
		assert_eq!(rr.rdlength, 4);
		assert!(rr.have_rdata);
		assert_eq!(rr.rdata_labels, 0);
		assert_eq!(&msg[rr.rdata_offset..][..4], &[192, 0, 2, 1]);
	}

	#[test]
	fn rr_mx_parses_exchange_name() {
		// Preference then the exchange domain name.
		let mut rdata = 10u16.to_be_bytes().to_vec();
		rdata.extend_from_slice(&name(&["mail", "example", "com"]));
		let msg = rr_message(ty::MX, &rdata);

		let mut dns = Dns::new(&msg);
		dns.parse_header().unwrap();

		let mut rr = Rr::default();
		let mut labels = [Label::default(); 16];
		dns.parse_rr(&mut rr, &mut labels).unwrap();

		assert_eq!(rr.labels, 3);
		assert_eq!(rr.rdata_labels, 4);
		assert!(rr.have_rdata && rr.have_rdata_labels);
		assert_eq!(labels[rr.labels].length, 4); // "mail"
		assert!(labels[rr.labels + 3].is_end);
		assert_eq!(rr.padding_length, 0);
	}

	#[test]
	fn rr_soa_parses_two_names() {
		let mut rdata = Vec::new();
		rdata.extend_from_slice(&name(&["ns1", "example", "com"]));
		rdata.extend_from_slice(&name(&["hostmaster", "example", "com"]));
		rdata.extend_from_slice(&[0; 20]); // serial .. minimum
		let msg = rr_message(ty::SOA, &rdata);

		let mut dns = Dns::new(&msg);
		dns.parse_header().unwrap();

		let mut rr = Rr::default();
		let mut labels = [Label::default(); 16];
		dns.parse_rr(&mut rr, &mut labels).unwrap();

		assert_eq!(rr.rdata_labels, 8);
		// The five u32 tail fields are recorded as padding for now.
		assert_eq!(rr.padding_length, 20);
		assert_eq!(rr.padding_offset, rr.rdata_offset + rdata.len() - 20);
		assert!(!rr.have_padding);
	}

	#[test]
	fn rr_srv_skips_fixed_prefix() {
		let mut rdata = Vec::new();
		rdata.extend_from_slice(&[0, 1, 0, 2, 0x23, 0x29]); // prio, weight, port
		rdata.extend_from_slice(&name(&["sip", "example", "com"]));
		let msg = rr_message(ty::SRV, &rdata);

		let mut dns = Dns::new(&msg);
		dns.parse_header().unwrap();

		let mut rr = Rr::default();
		let mut labels = [Label::default(); 16];
		dns.parse_rr(&mut rr, &mut labels).unwrap();

		assert_eq!(rr.rdata_labels, 4);
		assert_eq!(&msg[labels[rr.labels].offset as usize + 1..][..3], b"sip");
	}

	#[test]
	fn rr_naptr_counted_strings() {
		let mut rdata = Vec::new();
		rdata.extend_from_slice(&[0, 10, 0, 20]); // order, preference
		rdata.push(1);
		rdata.extend_from_slice(b"s");
		rdata.push(7);
		rdata.extend_from_slice(b"SIP+D2U");
		rdata.push(0); // empty regexp
		rdata.extend_from_slice(&name(&["_sip", "_udp", "example", "com"]));
		let msg = rr_message(ty::NAPTR, &rdata);

		let mut dns = Dns::new(&msg);
		dns.parse_header().unwrap();

		let mut rr = Rr::default();
		let mut labels = [Label::default(); 16];
		dns.parse_rr(&mut rr, &mut labels).unwrap();

		assert_eq!(rr.rdata_labels, 5);
		assert_eq!(rr.padding_length, 0);
	}

	#[test]
	fn rr_overrun_is_malformed() {
		// The exchange name runs past the declared RDLENGTH.
		let mut rdata = 10u16.to_be_bytes().to_vec();
		rdata.extend_from_slice(&name(&["mail", "example", "com"]));
		let mut msg = rr_message(ty::MX, &rdata);

		// Shrink RDLENGTH below what the name consumes.
		let rdlength_at = 12 + 13 + 8;
		msg[rdlength_at..rdlength_at + 2].copy_from_slice(&6u16.to_be_bytes());

		let mut dns = Dns::new(&msg);
		dns.parse_header().unwrap();

		let mut rr = Rr::default();
		let mut labels = [Label::default(); 16];
		assert_eq!(dns.parse_rr(&mut rr, &mut labels), Err(DnsError::Malformed));
	}
}
