//! The paired-response sink: queries and the answers from two servers (the
//! capture's original and the resolver under test) are written to three
//! named key-value stores for offline diffing. Keys are raw little-endian
//! request ids; the encodings match what the diff tooling expects.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use utils::bytes;
use utils::endian::{u16le, u32le};
use utils::error::*;

const META_VERSION: &str = "2018-05-21";

/// The per-answer value when a server produced no response.
const MISSING_MSEC: u32 = 0xffff_ffff;

#[derive(Debug)]
pub struct Respdiff {
	db: sled::Db,
	queries: sled::Tree,
	answers: sled::Tree,
	meta: sled::Tree,
	id: AtomicU32,
	pub count: AtomicU32,
}

fn entry(out: &mut Vec<u8>, answer: Option<(u32, &[u8])>) {
	match answer {
		Some((msec, dns)) => {
			out.extend_from_slice(bytes::as_slice(&u32le::from(msec)));
			out.extend_from_slice(bytes::as_slice(&u16le::from(dns.len() as u16)));
			out.extend_from_slice(dns);
		}
		None => {
			out.extend_from_slice(bytes::as_slice(&u32le::from(MISSING_MSEC)));
			out.extend_from_slice(bytes::as_slice(&u16le::from(0)));
		}
	}
}

impl Respdiff {
	pub fn open(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let db = sled::open(path).map_err(|err| log::error!("unable to open {}: {err}", path.display()))?;

		let open = |name: &str| db.open_tree(name).map_err(|err| log::error!("unable to open tree {name}: {err}"));

		Ok(Self {
			queries: open("queries")?,
			answers: open("answers")?,
			meta: open("meta")?,
			db,
			id: AtomicU32::new(0),
			count: AtomicU32::new(0),
		})
	}

	/// Store one `(query, original answer, received answer)` triple. Each
	/// answer is `(elapsed milliseconds, wire message)`; a missing answer is
	/// encoded with the sentinel elapsed value and a zero length.
	pub fn receive(&self, query: &[u8], original: Option<(u32, &[u8])>, response: Option<(u32, &[u8])>) -> Result {
		let id = self.id.fetch_add(1, Ordering::Relaxed);
		let key = bytes::as_slice(&u32le::from(id)).to_vec();

		self.queries
			.insert(&key, query)
			.map_err(|err| log::error!("storing query {id} failed: {err}"))?;

		let mut value = Vec::with_capacity(12 + original.map_or(0, |(_, dns)| dns.len()) + response.map_or(0, |(_, dns)| dns.len()));
		entry(&mut value, original);
		entry(&mut value, response);

		self.answers
			.insert(&key, value)
			.map_err(|err| log::error!("storing answers {id} failed: {err}"))?;

		self.count.fetch_add(1, Ordering::Relaxed);
		Ok(())
	}

	/// Write the run metadata and flush everything to disk.
	pub fn commit(&self, name0: &str, name1: &str, start_time: u32, end_time: u32) -> Result {
		let puts: [(&str, Vec<u8>); 6] = [
			("version", META_VERSION.as_bytes().to_vec()),
			("servers", bytes::as_slice(&u32le::from(2)).to_vec()),
			("name0", name0.as_bytes().to_vec()),
			("name1", name1.as_bytes().to_vec()),
			("start_time", bytes::as_slice(&u32le::from(start_time)).to_vec()),
			("end_time", bytes::as_slice(&u32le::from(end_time)).to_vec()),
		];

		for (key, value) in puts {
			self.meta
				.insert(key, value)
				.map_err(|err| log::error!("storing meta.{key} failed: {err}"))?;
		}

		self.db.flush().map_err(|err| log::error!("flush failed: {err}"))?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn stores_pairs_and_meta() {
		let dir = tempfile::tempdir().unwrap();
		let sink = Respdiff::open(dir.path().join("respdiff")).unwrap();

		sink.receive(b"queryone", Some((1, b"origone")), Some((3, b"recvone"))).unwrap();
		sink.receive(b"querytwo", None, Some((7, b"recvtwo"))).unwrap();
		sink.commit("capture", "resolver", 100, 200).unwrap();

		assert_eq!(&*sink.queries.get(0u32.to_le_bytes()).unwrap().unwrap(), b"queryone");

		let first = sink.answers.get(0u32.to_le_bytes()).unwrap().unwrap();
		let mut expect = Vec::new();
		expect.extend_from_slice(&1u32.to_le_bytes());
		expect.extend_from_slice(&7u16.to_le_bytes());
		expect.extend_from_slice(b"origone");
		expect.extend_from_slice(&3u32.to_le_bytes());
		expect.extend_from_slice(&7u16.to_le_bytes());
		expect.extend_from_slice(b"recvone");
		assert_eq!(&*first, &expect[..]);

		// A missing original answer is encoded with the sentinel.
		let second = sink.answers.get(1u32.to_le_bytes()).unwrap().unwrap();
		assert_eq!(&second[..6], &[0xff, 0xff, 0xff, 0xff, 0, 0]);

		assert_eq!(&*sink.meta.get("version").unwrap().unwrap(), META_VERSION.as_bytes());
		assert_eq!(&*sink.meta.get("servers").unwrap().unwrap(), &2u32.to_le_bytes());
		assert_eq!(&*sink.meta.get("name1").unwrap().unwrap(), b"resolver");
	}
}
