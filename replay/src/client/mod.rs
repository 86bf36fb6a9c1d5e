//! The replay client: consumes routed packets, re-sends every DNS query at
//! the resolver under test over the configured transport, and accounts each
//! response's latency and RCODE.
//!
//! Each worker owns one current-thread tokio runtime. A supervising task per
//! active client slot manages that client's connection; one task per
//! connection handles framing; per-request tasks enforce the timeout.
//! Dropping a task is cancellation, with unfinished queries re-queued to the
//! owning client as orphans.

use core::cell::{Cell, RefCell};
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use pipeline::channel::Get;
use rustls::pki_types::ServerName;
use tokio::sync::{mpsc, oneshot};
use tokio::task::LocalSet;
use tokio::time::Instant;
use utils::error::*;
use wire::dns::Dns;
use wire::object::{Kind, OwnedChain, OwnedLayer};

use crate::respdiff::Respdiff;
use crate::stats::{Report, Stats, StatsSet};

mod conn;
mod https2;
mod udp;

/// Check a TLS server name as configuration, before any connection uses it.
pub fn server_name_is_valid(name: &str) -> Result {
	ServerName::try_from(name.to_owned()).map(|_| ()).map_err(|_| ())
}

/// The transport used towards the resolver under test.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Transport {
	/// UDP only; truncated answers stay unanswered.
	Udp,
	/// UDP, re-sending over TCP when the answer has TC=1.
	UdpTcp,
	Tcp,
	Tls,
	Https2,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum H2Method {
	Post,
	Get,
}

#[derive(Clone, Debug)]
pub struct Https2Config {
	pub method: H2Method,
	/// The `:authority` pseudo-header; the target address when unset.
	pub authority: Option<String>,
	pub path: String,
	/// Upper bound on the assembled request URI in GET mode.
	pub max_uri_len: usize,
}

impl Default for Https2Config {
	fn default() -> Self {
		Self {
			method: H2Method::Post,
			authority: None,
			path: "/dns-query".into(),
			max_uri_len: 512,
		}
	}
}

#[derive(Clone, Debug)]
pub struct Config {
	pub transport: Transport,
	pub target: SocketAddr,
	/// Per-request deadline; also the length of the latency histogram.
	pub timeout_ms: u64,
	/// Per-connection deadline covering TCP, TLS and HTTP/2 setup.
	pub handshake_timeout_ms: u64,
	/// Close a drained connection this long after its last use; `None`
	/// closes it as soon as it drains.
	pub idle_timeout_ms: Option<u64>,
	pub stats_interval_ms: u64,
	pub max_clients: usize,
	/// UDP sockets kept for reuse after a successful exchange.
	pub max_reuse_clients: usize,
	/// Source addresses rotated through for bind-before-connect.
	pub sources: Vec<IpAddr>,
	/// TLS server name; the target IP when unset.
	pub tls_sni: Option<String>,
	pub h2: Https2Config,
	pub respdiff: Option<Arc<Respdiff>>,
}

impl Config {
	pub fn new(target: SocketAddr, transport: Transport) -> Self {
		Self {
			transport,
			target,
			timeout_ms: 2000,
			handshake_timeout_ms: 5000,
			idle_timeout_ms: None,
			stats_interval_ms: 1000,
			max_clients: 1024,
			max_reuse_clients: 128,
			sources: Vec::new(),
			tls_sni: None,
			h2: Https2Config::default(),
			respdiff: None,
		}
	}
}

/// One transport attempt of a request. A request usually has one; UDP with
/// TCP fallback chains a second.
pub(crate) struct Query {
	pub id: u16,
	pub payload: Bytes,
	pub answer: oneshot::Sender<Answer>,
	pub state: QueryState,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[allow(dead_code)] // states are written through the lifecycle, read by logs
pub(crate) enum QueryState {
	PendingWrite,
	PendingWriteCb,
	WriteFailed,
	Sent,
	Orphaned,
}

pub(crate) struct Answer {
	pub rcode: u8,
	/// The response wire bytes, captured only when a paired-response sink
	/// is attached.
	pub wire: Option<Bytes>,
}

/// A replay worker: one OS thread running a single-threaded event loop,
/// consuming owned chains from its ring channel until the channel closes,
/// then draining in-flight requests and reporting its statistics.
pub struct Worker {
	thread: thread::JoinHandle<Report>,
}

impl Worker {
	pub fn spawn(name: impl Into<String>, cfg: Config, input: Get<OwnedChain>) -> Result<Self> {
		let thread = thread::Builder::new()
			.name(name.into())
			.spawn(move || {
				let rt = tokio::runtime::Builder::new_current_thread()
					.enable_all()
					.build()
					.expect("tokio current-thread runtime");
				rt.block_on(run(cfg, input))
			})
			.map_err(|err| log::error!("failed to spawn replay worker: {err}"))?;

		Ok(Self { thread })
	}

	/// Wait for the worker to drain and return its statistics.
	pub fn finish(self) -> Result<Report> {
		self.thread.join().map_err(|_| log::error!("replay worker panicked"))
	}
}

async fn run(cfg: Config, input: Get<OwnedChain>) -> Report {
	let local = LocalSet::new();

	local
		.run_until(async move {
			let engine = Rc::new(Engine::new(cfg));

			let rotator = tokio::task::spawn_local({
				let engine = engine.clone();
				let interval = Duration::from_millis(engine.cfg.stats_interval_ms.max(1));
				async move {
					loop {
						tokio::time::sleep(interval).await;
						engine.rotate();
					}
				}
			});

			while let Some(chain) = next_chain(&input).await {
				Engine::handle(&engine, chain);
			}

			// The input is done; let outstanding requests run out.
			while engine.ongoing.get() > 0 {
				tokio::time::sleep(Duration::from_millis(10)).await;
			}

			rotator.abort();
			engine.report()
		})
		.await
}

/// Pull the next item off the ring without blocking the event loop. The
/// ring is poll-driven, so after a few polite yields this backs off to a
/// short sleep.
async fn next_chain(input: &Get<OwnedChain>) -> Option<OwnedChain> {
	let mut spins = 0u32;
	loop {
		if let Some(chain) = input.try_get() {
			return Some(chain);
		}
		if input.is_closed() {
			// Drain anything enqueued before the close was observed.
			return input.try_get();
		}
		if spins < 64 {
			spins += 1;
			tokio::task::yield_now().await;
		} else {
			tokio::time::sleep(Duration::from_micros(100)).await;
		}
	}
}

pub(crate) struct Engine {
	pub cfg: Config,
	stats: RefCell<StatsSet>,
	/// Per-client-slot senders to the connection supervisors, indexed by
	/// the routing id.
	slots: RefCell<Vec<Option<mpsc::UnboundedSender<Query>>>>,
	udp_pool: RefCell<Vec<tokio::net::UdpSocket>>,
	source_at: Cell<usize>,
	tls: Option<Arc<rustls::ClientConfig>>,
	pub ongoing: Cell<u64>,
	processed: Cell<u64>,
	discarded: Cell<u64>,
}

impl Engine {
	fn new(cfg: Config) -> Self {
		let tls = match cfg.transport {
			Transport::Tls => Some(conn::tls_config(b"dot")),
			Transport::Https2 => Some(conn::tls_config(b"h2")),
			_ => None,
		};

		let stats = RefCell::new(StatsSet::new(cfg.timeout_ms));
		let slots = RefCell::new((0..cfg.max_clients).map(|_| None).collect());

		Self {
			cfg,
			stats,
			slots,
			udp_pool: RefCell::new(Vec::new()),
			source_at: Cell::new(0),
			tls,
			ongoing: Cell::new(0),
			processed: Cell::new(0),
			discarded: Cell::new(0),
		}
	}

	/// Update the sum bucket and the current interval in parallel.
	pub(crate) fn stat_both(&self, f: impl Fn(&mut Stats)) {
		let mut stats = self.stats.borrow_mut();
		f(&mut stats.sum);
		f(stats.current());
	}

	pub(crate) fn stat_current(&self, f: impl Fn(&mut Stats)) {
		f(self.stats.borrow_mut().current());
	}

	fn rotate(&self) {
		let stats = self.stats.borrow();
		log::info!(
			"total processed: {}; answers: {}; discarded: {}; ongoing: {}",
			self.processed.get(),
			stats.sum.answers,
			self.discarded.get(),
			self.ongoing.get()
		);
		drop(stats);

		self.stats.borrow_mut().rotate(self.ongoing.get());
	}

	fn discard(&self, why: &str) {
		self.discarded.set(self.discarded.get() + 1);
		log::warn!("packet discarded ({why})");
	}

	/// Process one routed packet: find the payload and the client id, parse
	/// the query header, and start a request on this client's slot.
	fn handle(engine: &Rc<Engine>, chain: OwnedChain) {
		engine.processed.set(engine.processed.get() + 1);

		let Some(payload) = chain.payload() else {
			return engine.discard("missing payload layer");
		};

		let client = match chain.iter_inward().find(|l| matches!(l.kind(), Kind::Ip | Kind::Ip6)) {
			Some(OwnedLayer::Ip6(ip6)) => u32::from_ne_bytes(ip6.dst[..4].try_into().unwrap()),
			Some(OwnedLayer::Ip(ip)) => u32::from_ne_bytes(ip.dst),
			_ => return engine.discard("missing ip/ip6 layer"),
		};

		if client as usize >= engine.cfg.max_clients {
			return engine.discard("client exceeded max_clients");
		}

		// A header-only transport datagram decodes to an empty payload.
		if payload.bytes.is_empty() {
			return engine.discard("empty dns payload");
		}

		let mut dns = Dns::new(&payload.bytes);
		if dns.parse_header().is_err() {
			log::debug!("discarded malformed dns query: couldn't parse header");
			engine.discarded.set(engine.discarded.get() + 1);
			return;
		}
		let qid = dns.id;
		let payload = Bytes::copy_from_slice(&payload.bytes);

		log::debug!("client(c): {client}");

		engine.stat_both(|s| s.requests += 1);
		engine.ongoing.set(engine.ongoing.get() + 1);
		let started = Instant::now();

		match engine.cfg.transport {
			Transport::Udp | Transport::UdpTcp => {
				let engine = engine.clone();
				tokio::task::spawn_local(udp::request(engine, client, qid, payload, started));
			}
			Transport::Tcp | Transport::Tls | Transport::Https2 => {
				let rx = Engine::enqueue(engine, client, qid, payload.clone());
				let engine = engine.clone();
				tokio::task::spawn_local(async move {
					engine.await_answer(rx, started, &payload).await;
				});
			}
		}
	}

	/// Queue a query on the client's slot, starting its connection
	/// supervisor on first use.
	pub(crate) fn enqueue(engine: &Rc<Engine>, client: u32, id: u16, payload: Bytes) -> oneshot::Receiver<Answer> {
		let (tx, rx) = oneshot::channel();
		let query = Query {
			id,
			payload,
			answer: tx,
			state: QueryState::PendingWrite,
		};

		let sender = {
			let mut slots = engine.slots.borrow_mut();
			let slot = &mut slots[client as usize];

			if slot.is_none() {
				let (tx, queries) = mpsc::unbounded_channel();
				let engine = engine.clone();

				match engine.cfg.transport {
					Transport::Https2 => {
						tokio::task::spawn_local(https2::supervise(engine, queries));
					}
					_ => {
						tokio::task::spawn_local(conn::supervise(engine, queries));
					}
				}

				*slot = Some(tx);
			}

			slot.as_ref().unwrap().clone()
		};

		// The supervisor lives as long as the slot's sender does.
		let _ = sender.send(query);
		rx
	}

	/// Wait out a queued query's answer against the request deadline and
	/// record the outcome.
	pub(crate) async fn await_answer(&self, rx: oneshot::Receiver<Answer>, started: Instant, payload: &Bytes) {
		match tokio::time::timeout(Duration::from_millis(self.cfg.timeout_ms), rx).await {
			Ok(Ok(answer)) => self.answered(started, answer, payload),
			// Timed out, or the query was closed without an answer.
			_ => self.unanswered(),
		}
	}

	pub(crate) fn answered(&self, started: Instant, answer: Answer, query: &Bytes) {
		let latency = (started.elapsed().as_millis() as u64).min(self.cfg.timeout_ms);

		self.stat_both(|s| {
			s.answers += 1;
			s.bump_rcode(answer.rcode);
			s.record_latency(latency);
		});
		self.ongoing.set(self.ongoing.get() - 1);

		if let (Some(respdiff), Some(wire)) = (&self.cfg.respdiff, &answer.wire) {
			let _ = respdiff.receive(query, None, Some((latency as u32, wire)));
		}
	}

	pub(crate) fn unanswered(&self) {
		let timeout_ms = self.cfg.timeout_ms;
		self.stat_both(|s| s.record_latency(timeout_ms));
		self.ongoing.set(self.ongoing.get() - 1);
	}

	/// Whether answers need their wire bytes preserved.
	pub(crate) fn capture_wire(&self) -> bool {
		self.cfg.respdiff.is_some()
	}

	/// The next source address for bind-before-connect, rotating through
	/// the configured list.
	pub(crate) fn next_source(&self) -> Option<IpAddr> {
		if self.cfg.sources.is_empty() {
			return None;
		}
		let at = self.source_at.get();
		self.source_at.set((at + 1) % self.cfg.sources.len());
		Some(self.cfg.sources[at])
	}

	pub(crate) fn tls(&self) -> Arc<rustls::ClientConfig> {
		self.tls.clone().expect("TLS transport configured")
	}

	pub(crate) fn server_name(&self) -> ServerName<'static> {
		match &self.cfg.tls_sni {
			Some(name) => ServerName::try_from(name.clone()).expect("validated TLS server name"),
			None => ServerName::IpAddress(self.cfg.target.ip().into()),
		}
	}

	pub(crate) fn pooled_udp(&self) -> Option<tokio::net::UdpSocket> {
		self.udp_pool.borrow_mut().pop()
	}

	pub(crate) fn reuse_udp(&self, socket: tokio::net::UdpSocket) {
		let mut pool = self.udp_pool.borrow_mut();
		if pool.len() < self.cfg.max_reuse_clients {
			pool.push(socket);
		}
	}

	fn report(&self) -> Report {
		// Let the slot supervisors wind down with their senders.
		self.slots.borrow_mut().clear();

		let mut stats = self.stats.borrow_mut();
		stats.finish();

		Report {
			processed: self.processed.get(),
			discarded: self.discarded.get(),
			sum: stats.sum.clone(),
			intervals: stats.intervals.clone(),
		}
	}
}
