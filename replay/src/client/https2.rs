//! DNS over HTTPS: TLS with ALPN `h2`, one HTTP/2 stream per query. The
//! SETTINGS frame advertises a 65535-byte max frame size with server push
//! disabled. Queries go out as POST bodies or as base64url `?dns=` GET
//! parameters; DATA frames accumulate per stream until END_STREAM and the
//! result is treated as a bare DNS message.

use core::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use bytes::{Bytes, BytesMut};
use h2::client::{ResponseFuture, SendRequest};
use h2::SendStream;
use tokio::sync::{mpsc, Notify};
use wire::dns::Dns;

use super::conn::{self, ConnStream};
use super::{Answer, Engine, H2Method, Query, QueryState};

/// The largest DNS message carried either way; also our advertised
/// MAX_FRAME_SIZE.
const MAX_DNSMSG_SIZE: usize = 65535;

/// Streams allowed before the peer's SETTINGS arrive.
const INITIAL_MAX_CONCURRENT_STREAMS: u32 = 100;

struct Slot {
	/// The client's pending-query list, shared with stream tasks so a dying
	/// stream can orphan its query back.
	pending: RefCell<VecDeque<Query>>,
	/// Streams currently open.
	streams: Cell<u32>,
	congested: Cell<bool>,
	/// Cleared when the connection dies; also set by a stream that must
	/// take the whole connection down.
	alive: Cell<bool>,
	wake: Notify,
}

impl Slot {
	fn requeue(&self, mut query: Query) {
		query.state = QueryState::Orphaned;
		self.pending.borrow_mut().push_back(query);
		self.wake.notify_waiters();
	}
}

pub(crate) async fn supervise(engine: Rc<Engine>, mut rx: mpsc::UnboundedReceiver<Query>) {
	let slot = Rc::new(Slot {
		pending: RefCell::new(VecDeque::new()),
		streams: Cell::new(0),
		congested: Cell::new(false),
		alive: Cell::new(false),
		wake: Notify::new(),
	});
	let mut rx_open = true;

	loop {
		slot.pending.borrow_mut().retain(|q| !q.answer.is_closed());

		while slot.pending.borrow().is_empty() {
			if !rx_open && slot.streams.get() == 0 {
				return;
			}
			tokio::select! {
				item = rx.recv(), if rx_open => match item {
					Some(query) => slot.pending.borrow_mut().push_back(query),
					None => rx_open = false,
				},
				_ = slot.wake.notified() => {}
			}
		}
		while let Ok(query) = rx.try_recv() {
			slot.pending.borrow_mut().push_back(query);
		}

		// TCP + TLS within the handshake deadline, then the HTTP/2 preface
		// under a deadline of its own.
		let Ok(ConnStream::Tls(tls)) = conn::connect(&engine).await else {
			tokio::time::sleep(Duration::from_millis(10)).await;
			continue;
		};

		let handshake = h2::client::Builder::new()
			.max_frame_size(MAX_DNSMSG_SIZE as u32)
			.enable_push(false)
			.handshake::<_, Bytes>(*tls);

		let pair = match tokio::time::timeout(Duration::from_millis(engine.cfg.handshake_timeout_ms), handshake).await {
			Ok(Ok(pair)) => pair,
			Ok(Err(err)) => {
				log::info!("http2 handshake failed: {err}");
				engine.stat_both(|s| s.conn_handshakes_failed += 1);
				continue;
			}
			Err(_) => {
				log::info!("http2 handshake timed out");
				engine.stat_both(|s| s.conn_handshakes_failed += 1);
				continue;
			}
		};
		let (send_request, connection) = pair;

		engine.stat_current(|s| s.conn_active += 1);
		slot.alive.set(true);

		let driver = tokio::task::spawn_local({
			let slot = slot.clone();
			async move {
				if let Err(err) = connection.await {
					log::debug!("http2 connection terminated: {err}");
				}
				slot.alive.set(false);
				slot.wake.notify_waiters();
			}
		});

		run_h2(&engine, send_request, &slot, &mut rx, &mut rx_open).await;

		driver.abort();
		slot.alive.set(false);
		engine.stat_current(|s| s.conn_active = s.conn_active.saturating_sub(1));

		if !rx_open && slot.streams.get() == 0 && slot.pending.borrow().is_empty() {
			return;
		}
	}
}

async fn run_h2(
	engine: &Rc<Engine>,
	send_request: SendRequest<Bytes>,
	slot: &Rc<Slot>,
	rx: &mut mpsc::UnboundedReceiver<Query>,
	rx_open: &mut bool,
) {
	while slot.alive.get() {
		slot.pending.borrow_mut().retain(|q| !q.answer.is_closed());

		let next = slot.pending.borrow_mut().pop_front();
		let Some(query) = next else {
			let drained = slot.streams.get() == 0;
			if drained && !*rx_open {
				return;
			}
			if drained && engine.cfg.idle_timeout_ms.is_none() {
				return;
			}

			let nap = match engine.cfg.idle_timeout_ms {
				Some(idle) if drained => Duration::from_millis(idle),
				_ => Duration::from_millis(100),
			};

			tokio::select! {
				item = rx.recv(), if *rx_open => match item {
					Some(query) => slot.pending.borrow_mut().push_back(query),
					None => *rx_open = false,
				},
				_ = slot.wake.notified() => {}
				_ = tokio::time::sleep(nap) => {
					if drained {
						log::debug!("closing idle http2 connection");
						return;
					}
				}
			}
			continue;
		};

		if query.answer.is_closed() {
			continue;
		}

		// At the stream cap the connection is congested; hold the query
		// until a stream closes.
		if slot.streams.get() >= INITIAL_MAX_CONCURRENT_STREAMS {
			if !slot.congested.replace(true) {
				log::debug!("http2 connection is congested");
			}
			slot.pending.borrow_mut().push_front(query);
			tokio::select! {
				_ = slot.wake.notified() => {}
				_ = tokio::time::sleep(Duration::from_millis(50)) => {}
			}
			continue;
		}
		if slot.congested.replace(false) {
			log::debug!("http2 connection active again");
		}

		let ready = match send_request.clone().ready().await {
			Ok(ready) => ready,
			Err(err) => {
				log::info!("http2 connection not ready: {err}");
				slot.requeue(query);
				return;
			}
		};

		submit(engine, ready, query, slot);
	}
}

fn submit(engine: &Rc<Engine>, mut send_request: SendRequest<Bytes>, query: Query, slot: &Rc<Slot>) {
	let cfg = &engine.cfg;
	let authority = cfg.h2.authority.clone().unwrap_or_else(|| cfg.target.to_string());

	let (request, body) = match cfg.h2.method {
		H2Method::Post => {
			let request = http::Request::builder()
				.method(http::Method::POST)
				.version(http::Version::HTTP_2)
				.uri(format!("https://{}{}", authority, cfg.h2.path))
				.header(http::header::CONTENT_TYPE, "application/dns-message")
				.header(http::header::CONTENT_LENGTH, query.payload.len())
				.body(())
				.expect("valid POST request");
			(request, Some(query.payload.clone()))
		}
		H2Method::Get => {
			let path = format!("{}?dns={}", cfg.h2.path, URL_SAFE_NO_PAD.encode(&query.payload));
			if path.len() > cfg.h2.max_uri_len {
				log::info!("http2: assembled URI path exceeds {} bytes, query discarded", cfg.h2.max_uri_len);
				return;
			}
			let request = http::Request::builder()
				.method(http::Method::GET)
				.version(http::Version::HTTP_2)
				.uri(format!("https://{}{}", authority, path))
				.header(http::header::ACCEPT, "application/dns-message")
				.body(())
				.expect("valid GET request");
			(request, None)
		}
	};

	let end_of_stream = body.is_none();
	let (response, stream) = match send_request.send_request(request, end_of_stream) {
		Ok(pair) => pair,
		Err(err) => {
			log::info!("http2 send_request failed: {err}");
			slot.requeue(query);
			return;
		}
	};

	slot.streams.set(slot.streams.get() + 1);

	let engine = engine.clone();
	let slot = slot.clone();
	tokio::task::spawn_local(async move {
		let end = exchange(&engine, response, body.map(|payload| (stream, payload))).await;

		slot.streams.set(slot.streams.get() - 1);

		match end {
			StreamEnd::Answer(answer) => {
				let _ = query.answer.send(answer);
			}
			// Dropping the query closes it without an answer.
			StreamEnd::Discard => {}
			StreamEnd::Orphan => slot.requeue(query),
			StreamEnd::Poison => {
				slot.alive.set(false);
				slot.requeue(query);
			}
		}
		slot.wake.notify_waiters();
	});
}

enum StreamEnd {
	Answer(Answer),
	Discard,
	/// The stream died with the connection; retry the query.
	Orphan,
	/// The peer misbehaved badly enough to close the whole connection.
	Poison,
}

async fn exchange(engine: &Engine, response: ResponseFuture, body: Option<(SendStream<Bytes>, Bytes)>) -> StreamEnd {
	if let Some((mut stream, payload)) = body {
		if let Err(err) = stream.send_data(payload, true) {
			log::info!("http2 send_data failed: {err}");
			return StreamEnd::Orphan;
		}
	}

	let response = match response.await {
		Ok(response) => response,
		Err(err) => {
			log::info!("http2 request failed: {err}");
			return StreamEnd::Orphan;
		}
	};

	let status = response.status();
	if !status.is_informational() && !status.is_success() {
		log::debug!("http2 response status {status}, closing query");
		return StreamEnd::Discard;
	}

	let mut body = response.into_body();
	let mut acc = BytesMut::new();

	while let Some(chunk) = body.data().await {
		let chunk = match chunk {
			Ok(chunk) => chunk,
			Err(err) => {
				log::info!("http2 body error: {err}");
				return StreamEnd::Orphan;
			}
		};

		if acc.len() + chunk.len() > MAX_DNSMSG_SIZE {
			log::warn!("http2 response exceeds {MAX_DNSMSG_SIZE} bytes, closing connection");
			return StreamEnd::Poison;
		}

		let _ = body.flow_control().release_capacity(chunk.len());
		acc.extend_from_slice(&chunk);
	}

	let wire = acc.freeze();
	if wire.is_empty() {
		log::debug!("http2 response has no body");
		return StreamEnd::Discard;
	}

	let mut dns = Dns::new(&wire[..]);
	if dns.parse_header().is_err() {
		log::debug!("http2 response malformed");
		return StreamEnd::Discard;
	}

	StreamEnd::Answer(Answer {
		rcode: dns.rcode,
		wire: engine.capture_wire().then(|| wire.clone()),
	})
}
