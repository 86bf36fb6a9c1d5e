//! Time-sliced replay statistics. Counters and a 1-ms latency histogram are
//! kept per interval bucket; a sum bucket is updated in parallel with every
//! interval so end-of-run totals need no merging pass.

use serde::Serialize;

use wire::dns::rcode;

/// One statistics bucket: counters plus a latency histogram with one slot
/// per millisecond up to the request timeout. Index `timeout_ms` counts the
/// requests that timed out.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Stats {
	pub since_ms: u64,
	pub until_ms: u64,

	pub requests: u64,
	pub ongoing: u64,
	pub answers: u64,

	/// Connections open at the end of the interval.
	pub conn_active: u64,
	/// Connection handshake attempts during the interval.
	pub conn_handshakes: u64,
	/// Connections established through TLS session resumption.
	pub conn_resumed: u64,
	/// Handshakes that failed or timed out during the interval.
	pub conn_handshakes_failed: u64,

	pub rcode_noerror: u64,
	pub rcode_formerr: u64,
	pub rcode_servfail: u64,
	pub rcode_nxdomain: u64,
	pub rcode_notimp: u64,
	pub rcode_refused: u64,
	pub rcode_yxdomain: u64,
	pub rcode_yxrrset: u64,
	pub rcode_nxrrset: u64,
	pub rcode_notauth: u64,
	pub rcode_notzone: u64,
	pub rcode_badvers: u64,
	pub rcode_badkey: u64,
	pub rcode_badtime: u64,
	pub rcode_badmode: u64,
	pub rcode_badname: u64,
	pub rcode_badalg: u64,
	pub rcode_badtrunc: u64,
	pub rcode_badcookie: u64,
	pub rcode_other: u64,

	pub latency: Vec<u64>,
}

impl Stats {
	pub fn new(timeout_ms: u64) -> Self {
		Self {
			latency: vec![0; timeout_ms as usize + 1],
			..Self::default()
		}
	}

	pub fn bump_rcode(&mut self, rcode: u8) {
		let counter = match rcode {
			rcode::NOERROR => &mut self.rcode_noerror,
			rcode::FORMERR => &mut self.rcode_formerr,
			rcode::SERVFAIL => &mut self.rcode_servfail,
			rcode::NXDOMAIN => &mut self.rcode_nxdomain,
			rcode::NOTIMP => &mut self.rcode_notimp,
			rcode::REFUSED => &mut self.rcode_refused,
			rcode::YXDOMAIN => &mut self.rcode_yxdomain,
			rcode::YXRRSET => &mut self.rcode_yxrrset,
			rcode::NXRRSET => &mut self.rcode_nxrrset,
			rcode::NOTAUTH => &mut self.rcode_notauth,
			rcode::NOTZONE => &mut self.rcode_notzone,
			rcode::BADVERS => &mut self.rcode_badvers,
			rcode::BADKEY => &mut self.rcode_badkey,
			rcode::BADTIME => &mut self.rcode_badtime,
			rcode::BADMODE => &mut self.rcode_badmode,
			rcode::BADNAME => &mut self.rcode_badname,
			rcode::BADALG => &mut self.rcode_badalg,
			rcode::BADTRUNC => &mut self.rcode_badtrunc,
			rcode::BADCOOKIE => &mut self.rcode_badcookie,
			_ => &mut self.rcode_other,
		};
		*counter += 1;
	}

	pub fn record_latency(&mut self, ms: u64) {
		let slot = (ms as usize).min(self.latency.len() - 1);
		self.latency[slot] += 1;
	}

	/// Fold another bucket into this one (the interval boundary fields keep
	/// the widest span).
	pub fn merge(&mut self, other: &Stats) {
		if self.since_ms == 0 || (other.since_ms != 0 && other.since_ms < self.since_ms) {
			self.since_ms = other.since_ms;
		}
		self.until_ms = self.until_ms.max(other.until_ms);

		self.requests += other.requests;
		self.ongoing += other.ongoing;
		self.answers += other.answers;
		self.conn_active += other.conn_active;
		self.conn_handshakes += other.conn_handshakes;
		self.conn_resumed += other.conn_resumed;
		self.conn_handshakes_failed += other.conn_handshakes_failed;

		self.rcode_noerror += other.rcode_noerror;
		self.rcode_formerr += other.rcode_formerr;
		self.rcode_servfail += other.rcode_servfail;
		self.rcode_nxdomain += other.rcode_nxdomain;
		self.rcode_notimp += other.rcode_notimp;
		self.rcode_refused += other.rcode_refused;
		self.rcode_yxdomain += other.rcode_yxdomain;
		self.rcode_yxrrset += other.rcode_yxrrset;
		self.rcode_nxrrset += other.rcode_nxrrset;
		self.rcode_notauth += other.rcode_notauth;
		self.rcode_notzone += other.rcode_notzone;
		self.rcode_badvers += other.rcode_badvers;
		self.rcode_badkey += other.rcode_badkey;
		self.rcode_badtime += other.rcode_badtime;
		self.rcode_badmode += other.rcode_badmode;
		self.rcode_badname += other.rcode_badname;
		self.rcode_badalg += other.rcode_badalg;
		self.rcode_badtrunc += other.rcode_badtrunc;
		self.rcode_badcookie += other.rcode_badcookie;
		self.rcode_other += other.rcode_other;

		if self.latency.len() < other.latency.len() {
			self.latency.resize(other.latency.len(), 0);
		}
		for (slot, count) in other.latency.iter().enumerate() {
			self.latency[slot] += count;
		}
	}
}

/// The rolling set of buckets for one replay worker: the interval list and
/// the sum bucket updated in parallel.
#[derive(Debug)]
pub struct StatsSet {
	pub sum: Stats,
	pub intervals: Vec<Stats>,
	timeout_ms: u64,
}

impl StatsSet {
	pub fn new(timeout_ms: u64) -> Self {
		let now = runtime::time::unix_ms();
		let mut sum = Stats::new(timeout_ms);
		let mut first = Stats::new(timeout_ms);
		sum.since_ms = now;
		first.since_ms = now;

		Self { sum, intervals: vec![first], timeout_ms }
	}

	pub fn current(&mut self) -> &mut Stats {
		self.intervals.last_mut().unwrap()
	}

	/// Seal the current interval and open the next one. The active
	/// connection gauge and the ongoing count carry over.
	pub fn rotate(&mut self, ongoing: u64) {
		let now = runtime::time::unix_ms();

		let mut next = Stats::new(self.timeout_ms);
		next.since_ms = now;
		next.ongoing = ongoing;

		let current = self.current();
		current.until_ms = now;
		next.conn_active = current.conn_active;

		self.intervals.push(next);
	}

	pub fn finish(&mut self) {
		let now = runtime::time::unix_ms();
		self.sum.until_ms = now;
		self.current().until_ms = now;
	}
}

/// What one replay worker hands back when it drains.
#[derive(Clone, Debug, Default, Serialize)]
pub struct Report {
	pub processed: u64,
	pub discarded: u64,
	pub sum: Stats,
	pub intervals: Vec<Stats>,
}

impl Report {
	pub fn merge(&mut self, other: &Report) {
		self.processed += other.processed;
		self.discarded += other.discarded;
		self.sum.merge(&other.sum);
		self.intervals.extend(other.intervals.iter().cloned());
	}
}
