//! PCAP capture file I/O: a streaming reader, a memory-mapped reader, a
//! reader for compressed captures, and the record writer.
//!
//! <https://wiki.wireshark.org/Development/LibpcapFileFormat>

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use memmap2::Mmap;
use utils::bytes::{self, Cast};
use utils::error::*;

use crate::object::{Pcap, Ts};

/// The largest snaplen accepted in a capture file header.
pub const MAX_SNAPLEN: u32 = 0x40000;

/// Data link types. See <https://www.tcpdump.org/linktypes.html>.
pub mod linktype {
	pub const NULL: u32 = 0;
	pub const EN10MB: u32 = 1;
	pub const ATM_RFC1483: u32 = 11;
	pub const RAW: u32 = 12;
	pub const SLIP_BSDOS: u32 = 15;
	pub const PPP_BSDOS: u32 = 16;
	pub const ATM_CLIP: u32 = 19;
	pub const PPP_SERIAL: u32 = 50;
	pub const PPP_ETHER: u32 = 51;
	pub const C_HDLC: u32 = 104;
	pub const FRELAY: u32 = 107;
	pub const LOOP: u32 = 108;
	pub const LINUX_SLL: u32 = 113;
	pub const IPV4: u32 = 228;
	pub const IPV6: u32 = 229;
	pub const LINUX_SLL2: u32 = 276;
}

/// Identifiers of increasing source streams, injectable for tests.
pub struct StreamIds(AtomicU32);

impl StreamIds {
	pub const fn new() -> Self {
		Self(AtomicU32::new(0))
	}

	pub fn next(&self) -> u32 {
		self.0.fetch_add(1, Ordering::Relaxed)
	}
}

/// The process-wide source-stream id counter.
pub static STREAM_IDS: StreamIds = StreamIds::new();

/// The parsed capture file header.
#[derive(Clone, Copy, Debug)]
pub struct Meta {
	pub version_major: u16,
	pub version_minor: u16,
	pub thiszone: i32,
	pub sigfigs: u32,
	pub snaplen: u32,
	/// The raw network value from the file.
	pub network: u32,
	/// `network` remapped to the corresponding link-type constant.
	pub linktype: u32,
	pub is_swapped: bool,
	pub is_nanosec: bool,
	pub stream_id: u32,
}

/// Historical network values whose numbering diverges from the link-type
/// registry; anything else passes through unchanged.
fn remap_network(network: u32) -> u32 {
	match network {
		100 => linktype::ATM_RFC1483,
		101 => linktype::RAW,
		102 => linktype::SLIP_BSDOS,
		103 => linktype::PPP_BSDOS,
		104 => linktype::C_HDLC,
		106 => linktype::ATM_CLIP,
		107 => linktype::FRELAY,
		50 => linktype::PPP_SERIAL,
		51 => linktype::PPP_ETHER,
		other => other,
	}
}

fn parse_file_header(buf: &[u8; 24], ids: &StreamIds) -> Result<Meta> {
	let field = |n: usize| u32::from_ne_bytes(buf[n * 4..n * 4 + 4].try_into().unwrap());

	let (is_swapped, is_nanosec) = match field(0) {
		0xa1b2c3d4 => (false, false),
		0xa1b23c4d => (false, true),
		0xd4c3b2a1 => (true, false),
		0x4d3cb2a1 => (true, true),
		magic => {
			log::error!("unsupported PCAP magic number: 0x{magic:08x}");
			return Err(());
		}
	};

	let swap32 = |v: u32| if is_swapped { v.swap_bytes() } else { v };

	let mut version_major = u16::from_ne_bytes(buf[4..6].try_into().unwrap());
	let mut version_minor = u16::from_ne_bytes(buf[6..8].try_into().unwrap());
	if is_swapped {
		version_major = version_major.swap_bytes();
		version_minor = version_minor.swap_bytes();
	}

	if version_major != 2 || version_minor != 4 {
		log::error!("unsupported PCAP version: {version_major}.{version_minor}, expected 2.4");
		return Err(());
	}

	let snaplen = swap32(field(4));
	if snaplen > MAX_SNAPLEN {
		log::error!("too large snaplen ({snaplen})");
		return Err(());
	}

	let network = swap32(field(5));

	Ok(Meta {
		version_major,
		version_minor,
		thiszone: swap32(field(2)) as i32,
		sigfigs: swap32(field(3)),
		snaplen,
		network,
		linktype: remap_network(network),
		is_swapped,
		is_nanosec,
		stream_id: ids.next(),
	})
}

#[derive(Clone, Copy)]
struct RecordHeader {
	ts_sec: u32,
	ts_frac: u32,
	incl_len: u32,
	orig_len: u32,
}

impl RecordHeader {
	fn parse(buf: &[u8; 16], meta: &Meta) -> Result<Self> {
		let field = |n: usize| {
			let v = u32::from_ne_bytes(buf[n * 4..n * 4 + 4].try_into().unwrap());
			if meta.is_swapped {
				v.swap_bytes()
			} else {
				v
			}
		};

		let hdr = Self {
			ts_sec: field(0),
			ts_frac: field(1),
			incl_len: field(2),
			orig_len: field(3),
		};

		if hdr.incl_len > meta.snaplen {
			log::error!("invalid packet length {}, larger than snaplen {}", hdr.incl_len, meta.snaplen);
			return Err(());
		}

		Ok(hdr)
	}

	fn ts(&self, meta: &Meta) -> Ts {
		Ts {
			sec: self.ts_sec as u64,
			nsec: if meta.is_nanosec { self.ts_frac } else { self.ts_frac * 1000 },
		}
	}
}

fn record<'a>(meta: &Meta, hdr: &RecordHeader, bytes: &'a [u8]) -> Pcap<'a> {
	Pcap {
		ts: hdr.ts(meta),
		caplen: hdr.incl_len,
		origlen: hdr.orig_len,
		snaplen: meta.snaplen,
		linktype: meta.linktype,
		is_swapped: meta.is_swapped,
		bytes,
	}
}

/// Read a header-sized chunk, distinguishing a clean end of stream from a
/// truncated one.
fn read_or_eof<const N: usize>(file: &mut impl Read, buf: &mut [u8; N]) -> Result<bool> {
	let mut got = 0;
	while got < N {
		match file.read(&mut buf[got..]) {
			Ok(0) if got == 0 => return Ok(false),
			Ok(0) => {
				log::error!("could not read full PCAP record header");
				return Err(());
			}
			Ok(n) => got += n,
			Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
			Err(err) => {
				log::error!("PCAP read error: {err}");
				return Err(());
			}
		}
	}
	Ok(true)
}

/// A streaming capture reader that owns a single record buffer; each
/// produced record is valid until the next call.
pub struct FileReader {
	file: File,
	meta: Meta,
	buf: Vec<u8>,
}

impl FileReader {
	pub fn open(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let mut file = File::open(path).map_err(|err| log::error!("unable to open {}: {err}", path.display()))?;

		#[cfg(target_os = "linux")]
		{
			use std::os::fd::AsRawFd;
			unsafe { libc::posix_fadvise(file.as_raw_fd(), 0, 0, libc::POSIX_FADV_SEQUENTIAL) };
		}

		let mut hdr = [0; 24];
		file.read_exact(&mut hdr)
			.map_err(|err| log::error!("could not read full PCAP header: {err}"))?;

		let meta = parse_file_header(&hdr, &STREAM_IDS)?;
		log::debug!(
			"pcap v{}.{} snaplen:{}{}{}",
			meta.version_major,
			meta.version_minor,
			meta.snaplen,
			if meta.is_swapped { " swapped" } else { "" },
			if meta.is_nanosec { " nanosec" } else { "" }
		);

		let buf = vec![0; meta.snaplen as usize];
		Ok(Self { file, meta, buf })
	}

	pub fn meta(&self) -> &Meta {
		&self.meta
	}

	/// The next record, or `None` at end of file.
	pub fn produce(&mut self) -> Result<Option<Pcap<'_>>> {
		let mut hdr = [0; 16];
		if !read_or_eof(&mut self.file, &mut hdr)? {
			return Ok(None);
		}

		let hdr = RecordHeader::parse(&hdr, &self.meta)?;

		self.file
			.read_exact(&mut self.buf[..hdr.incl_len as usize])
			.map_err(|err| log::error!("failed to read packet data: {err}"))?;

		Ok(Some(record(&self.meta, &hdr, &self.buf[..hdr.incl_len as usize])))
	}
}

/// A capture reader over a memory mapping; records point straight into the
/// mapped bytes.
pub struct MmapReader {
	map: Mmap,
	meta: Meta,
	at: usize,
}

impl MmapReader {
	pub fn open(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let file = File::open(path).map_err(|err| log::error!("unable to open {}: {err}", path.display()))?;
		let map = unsafe { Mmap::map(&file) }.map_err(|err| log::error!("unable to mmap {}: {err}", path.display()))?;

		if map.len() < 24 {
			log::error!("could not read full PCAP header");
			return Err(());
		}

		let meta = parse_file_header(map[..24].try_into().unwrap(), &STREAM_IDS)?;
		Ok(Self { map, meta, at: 24 })
	}

	pub fn meta(&self) -> &Meta {
		&self.meta
	}

	pub fn produce(&mut self) -> Result<Option<Pcap<'_>>> {
		if self.at == self.map.len() {
			return Ok(None);
		}

		let Some(hdr) = self.map.get(self.at..self.at + 16) else {
			log::error!("could not read full PCAP record header");
			return Err(());
		};
		let hdr = RecordHeader::parse(hdr.try_into().unwrap(), &self.meta)?;
		self.at += 16;

		let Some(bytes) = self.map.get(self.at..self.at + hdr.incl_len as usize) else {
			log::error!("failed to read packet data: unexpected end of mapping");
			return Err(());
		};
		self.at += hdr.incl_len as usize;

		Ok(Some(record(&self.meta, &hdr, bytes)))
	}
}

/// The compression codecs accepted for capture files. Only decompression is
/// supported; the codec's own framing wraps ordinary PCAP contents.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Codec {
	Gzip,
	Zstd,
	Lz4,
	Xz,
}

impl Codec {
	/// Pick a codec from the file suffix.
	pub fn from_path(path: &Path) -> Option<Self> {
		match path.extension()?.to_str()? {
			"gz" => Some(Self::Gzip),
			"zst" => Some(Self::Zstd),
			"lz4" => Some(Self::Lz4),
			"xz" => Some(Self::Xz),
			_ => None,
		}
	}
}

enum Decoder {
	Gzip(flate2::read::MultiGzDecoder<File>),
	Zstd(zstd::Decoder<'static, BufReader<File>>),
	Lz4(Box<lz4_flex::frame::FrameDecoder<File>>),
	Xz(xz2::read::XzDecoder<File>),
}

impl Read for Decoder {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		match self {
			Decoder::Gzip(dec) => dec.read(buf),
			Decoder::Zstd(dec) => dec.read(buf),
			Decoder::Lz4(dec) => dec.read(buf),
			Decoder::Xz(dec) => dec.read(buf),
		}
	}
}

/// A streaming reader over a compressed capture. The decompressor's output
/// buffer backs the current record.
pub struct CompressedReader {
	dec: Decoder,
	meta: Meta,
	buf: Vec<u8>,
}

impl CompressedReader {
	pub fn open(path: impl AsRef<Path>, codec: Codec) -> Result<Self> {
		let path = path.as_ref();
		let file = File::open(path).map_err(|err| log::error!("unable to open {}: {err}", path.display()))?;

		let mut dec = match codec {
			Codec::Gzip => Decoder::Gzip(flate2::read::MultiGzDecoder::new(file)),
			Codec::Zstd => Decoder::Zstd(zstd::Decoder::new(file).map_err(|err| log::error!("zstd init failed: {err}"))?),
			Codec::Lz4 => Decoder::Lz4(Box::new(lz4_flex::frame::FrameDecoder::new(file))),
			Codec::Xz => Decoder::Xz(xz2::read::XzDecoder::new(file)),
		};

		let mut hdr = [0; 24];
		dec.read_exact(&mut hdr)
			.map_err(|err| log::error!("could not read full PCAP header: {err}"))?;

		let meta = parse_file_header(&hdr, &STREAM_IDS)?;
		let buf = vec![0; meta.snaplen as usize];
		Ok(Self { dec, meta, buf })
	}

	pub fn meta(&self) -> &Meta {
		&self.meta
	}

	pub fn produce(&mut self) -> Result<Option<Pcap<'_>>> {
		let mut hdr = [0; 16];
		if !read_or_eof(&mut self.dec, &mut hdr)? {
			return Ok(None);
		}

		let hdr = RecordHeader::parse(&hdr, &self.meta)?;

		self.dec
			.read_exact(&mut self.buf[..hdr.incl_len as usize])
			.map_err(|err| log::error!("failed to read packet data: {err}"))?;

		Ok(Some(record(&self.meta, &hdr, &self.buf[..hdr.incl_len as usize])))
	}
}

#[derive(Cast)]
#[repr(C)]
struct FileHeader {
	magic_number: u32,
	version_major: u16,
	version_minor: u16,
	thiszone: i32,
	sigfigs: u32,
	snaplen: u32,
	network: u32,
}

#[derive(Cast)]
#[repr(C)]
struct WriteRecordHeader {
	ts_sec: u32,
	ts_frac: u32,
	incl_len: u32,
	orig_len: u32,
}

/// Writes records back out in PCAP format at a configured linktype and
/// snaplen, in native byteorder.
pub struct Writer {
	file: File,
	snaplen: u32,
	nanosec: bool,
}

impl Writer {
	pub fn create(path: impl AsRef<Path>, network: u32, snaplen: u32, nanosec: bool) -> Result<Self> {
		let path = path.as_ref();
		let mut file = File::create(path).map_err(|err| log::error!("unable to create {}: {err}", path.display()))?;

		let header = FileHeader {
			// 0xa1b23c4d for nanosecond-resolution files, 0xa1b2c3d4 for microsecond
			magic_number: if nanosec { 0xa1b23c4d } else { 0xa1b2c3d4 },
			version_major: 2,
			version_minor: 4,
			thiszone: 0,
			sigfigs: 0,
			snaplen,
			network,
		};

		file.write_all(bytes::as_slice(&header))
			.map_err(|err| log::error!("could not write header: {err}"))?;

		Ok(Self { file, snaplen, nanosec })
	}

	pub fn write(&mut self, pkt: &Pcap) -> Result {
		let incl_len = (pkt.bytes.len() as u32).min(self.snaplen);

		let header = WriteRecordHeader {
			ts_sec: pkt.ts.sec as u32,
			ts_frac: if self.nanosec { pkt.ts.nsec } else { pkt.ts.nsec / 1000 },
			incl_len,
			orig_len: pkt.origlen,
		};

		self.file
			.write_all(bytes::as_slice(&header))
			.and_then(|()| self.file.write_all(&pkt.bytes[..incl_len as usize]))
			.map_err(|err| log::error!("unable to write record: {err}"))
	}
}
