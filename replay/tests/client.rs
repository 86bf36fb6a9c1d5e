//! End-to-end exercises of the replay client against loopback responders.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use replay::client::{Config, Transport, Worker};
use wire::object::{Chain, Ip6, Kind, Layer, OwnedChain, Payload};

/// A query for `A example.com.`.
fn query(id: u16) -> Vec<u8> {
	let mut q = Vec::new();
	q.extend_from_slice(&id.to_be_bytes());
	q.extend_from_slice(&[0x01, 0x00]); // rd
	q.extend_from_slice(&1u16.to_be_bytes());
	q.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
	for part in ["example", "com"] {
		q.push(part.len() as u8);
		q.extend_from_slice(part.as_bytes());
	}
	q.push(0);
	q.extend_from_slice(&1u16.to_be_bytes()); // A
	q.extend_from_slice(&1u16.to_be_bytes()); // IN
	q
}

/// Flip the query into a NOERROR answer with one A record.
fn answer(query: &[u8]) -> Vec<u8> {
	let mut a = query.to_vec();
	a[2] |= 0x80; // qr
	a[6..8].copy_from_slice(&1u16.to_be_bytes()); // ancount
	a.extend_from_slice(&[0xc0, 12]); // name: pointer to the question
	a.extend_from_slice(&1u16.to_be_bytes());
	a.extend_from_slice(&1u16.to_be_bytes());
	a.extend_from_slice(&60u32.to_be_bytes());
	a.extend_from_slice(&4u16.to_be_bytes());
	a.extend_from_slice(&[192, 0, 2, 1]);
	a
}

/// Wrap a query payload the way the routing filter delivers it: an IPv6
/// layer whose destination carries the client id, then the payload.
fn routed(client: u32, payload: &[u8]) -> OwnedChain {
	let mut dst = [0u8; 16];
	dst[..4].copy_from_slice(&client.to_ne_bytes());

	let mut chain = Chain::new();
	chain.push(Layer::Ip6(Ip6 {
		flow: 0,
		plen: payload.len() as u16,
		nxt: 17,
		hlim: 64,
		src: [1; 16],
		dst,
		is_frag: false,
		frag_offlg: 0,
		frag_ident: 0,
		have_rtdst: false,
		rtdst: [0; 16],
	}));
	chain.push(Layer::Payload(Payload { bytes: payload, padding: 0 }));
	chain.copy(Kind::ALL)
}

/// A UDP responder that answers every well-formed query; with `truncate` it
/// only ever sets TC=1.
fn udp_responder(socket: UdpSocket, truncate: bool, done: Arc<AtomicBool>) -> thread::JoinHandle<()> {
	socket.set_read_timeout(Some(Duration::from_millis(100))).unwrap();

	thread::spawn(move || {
		let mut buf = [0u8; 65535];
		while !done.load(Ordering::Relaxed) {
			let Ok((n, peer)) = socket.recv_from(&mut buf) else { continue };

			let reply = if truncate {
				let mut reply = buf[..n].to_vec();
				reply[2] |= 0x80 | 0x02; // qr, tc
				reply
			} else {
				answer(&buf[..n])
			};
			let _ = socket.send_to(&reply, peer);
		}
	})
}

/// A TCP responder speaking RFC 1035 framing. Counts accepted connections
/// and signals when a connection is closed by the peer or by idling.
struct TcpResponder {
	conns: Arc<AtomicUsize>,
	closed: Arc<AtomicBool>,
}

fn tcp_responder(listener: TcpListener, done: Arc<AtomicBool>) -> TcpResponder {
	let conns = Arc::new(AtomicUsize::new(0));
	let closed = Arc::new(AtomicBool::new(false));

	let responder = TcpResponder { conns: conns.clone(), closed: closed.clone() };
	listener.set_nonblocking(true).unwrap();

	thread::spawn(move || {
		while !done.load(Ordering::Relaxed) {
			let Ok((mut stream, _)) = listener.accept() else {
				thread::sleep(Duration::from_millis(10));
				continue;
			};
			conns.fetch_add(1, Ordering::Relaxed);
			stream.set_nonblocking(false).unwrap();
			stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

			loop {
				let mut len = [0u8; 2];
				if stream.read_exact(&mut len).is_err() {
					break;
				}
				let mut msg = vec![0u8; u16::from_be_bytes(len) as usize];
				if stream.read_exact(&mut msg).is_err() {
					break;
				}

				let reply = answer(&msg);
				let framed = [&(reply.len() as u16).to_be_bytes()[..], &reply].concat();
				if stream.write_all(&framed).is_err() {
					break;
				}
			}
			closed.store(true, Ordering::Relaxed);
		}
	});

	responder
}

#[test]
fn udp_happy_path() {
	let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
	let target: SocketAddr = socket.local_addr().unwrap();
	let done = Arc::new(AtomicBool::new(false));
	let _responder = udp_responder(socket, false, done.clone());

	let mut cfg = Config::new(target, Transport::Udp);
	cfg.timeout_ms = 2000;
	cfg.max_clients = 4;

	let (put, get) = pipeline::channel::spsc(16);
	let worker = Worker::spawn("replay-test", cfg, get).unwrap();

	put.put(routed(0, &query(0x1234)));
	put.close();
	drop(put);

	let report = worker.finish().unwrap();
	done.store(true, Ordering::Relaxed);

	assert_eq!(report.processed, 1);
	assert_eq!(report.sum.requests, 1);
	assert_eq!(report.sum.answers, 1);
	assert_eq!(report.sum.rcode_noerror, 1);
	// Exactly one histogram slot incremented, within 100 ms.
	assert_eq!(report.sum.latency.iter().sum::<u64>(), 1);
	assert_eq!(report.sum.latency[..100].iter().sum::<u64>(), 1);
}

#[test]
fn udp_truncation_falls_back_to_tcp() {
	let listener = TcpListener::bind("127.0.0.1:0").unwrap();
	let target: SocketAddr = listener.local_addr().unwrap();
	let socket = UdpSocket::bind(target).unwrap();

	let done = Arc::new(AtomicBool::new(false));
	let _responder = udp_responder(socket, true, done.clone());
	let tcp = tcp_responder(listener, done.clone());

	let mut cfg = Config::new(target, Transport::UdpTcp);
	cfg.timeout_ms = 2000;
	cfg.max_clients = 4;

	let (put, get) = pipeline::channel::spsc(16);
	let worker = Worker::spawn("replay-test", cfg, get).unwrap();

	put.put(routed(0, &query(0x4321)));
	put.close();
	drop(put);

	let report = worker.finish().unwrap();
	done.store(true, Ordering::Relaxed);

	assert_eq!(report.sum.answers, 1);
	assert_eq!(report.sum.rcode_noerror, 1);
	assert_eq!(tcp.conns.load(Ordering::Relaxed), 1);
}

#[test]
fn tcp_connection_reused_then_idles_out() {
	let listener = TcpListener::bind("127.0.0.1:0").unwrap();
	let target: SocketAddr = listener.local_addr().unwrap();

	let done = Arc::new(AtomicBool::new(false));
	let tcp = tcp_responder(listener, done.clone());

	let mut cfg = Config::new(target, Transport::Tcp);
	cfg.timeout_ms = 2000;
	cfg.idle_timeout_ms = Some(200);
	cfg.max_clients = 4;

	let (put, get) = pipeline::channel::spsc(16);
	let worker = Worker::spawn("replay-test", cfg, get).unwrap();

	// Two sequential queries from the same client, close enough together
	// to land on one connection.
	put.put(routed(0, &query(1)));
	thread::sleep(Duration::from_millis(50));
	put.put(routed(0, &query(2)));

	// The connection must close on its own once the idle timeout elapses.
	let sent_at = Instant::now();
	while !tcp.closed.load(Ordering::Relaxed) {
		assert!(sent_at.elapsed() < Duration::from_secs(3), "connection never idled out");
		thread::sleep(Duration::from_millis(10));
	}
	assert!(sent_at.elapsed() >= Duration::from_millis(150));

	put.close();
	drop(put);

	let report = worker.finish().unwrap();
	done.store(true, Ordering::Relaxed);

	assert_eq!(report.sum.answers, 2);
	assert_eq!(report.sum.rcode_noerror, 2);
	assert_eq!(tcp.conns.load(Ordering::Relaxed), 1, "a single connection serves both queries");
}

#[test]
fn orphaned_query_resent_over_new_connection() {
	let listener = TcpListener::bind("127.0.0.1:0").unwrap();
	let target: SocketAddr = listener.local_addr().unwrap();

	let conns = Arc::new(AtomicUsize::new(0));
	let done = Arc::new(AtomicBool::new(false));

	// The first connection swallows the query and dies; later ones answer.
	{
		let conns = conns.clone();
		let done = done.clone();
		listener.set_nonblocking(true).unwrap();
		thread::spawn(move || {
			while !done.load(Ordering::Relaxed) {
				let Ok((mut stream, _)) = listener.accept() else {
					thread::sleep(Duration::from_millis(10));
					continue;
				};
				let nth = conns.fetch_add(1, Ordering::Relaxed);
				stream.set_nonblocking(false).unwrap();
				stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();

				loop {
					let mut len = [0u8; 2];
					if stream.read_exact(&mut len).is_err() {
						break;
					}
					let mut msg = vec![0u8; u16::from_be_bytes(len) as usize];
					if stream.read_exact(&mut msg).is_err() {
						break;
					}
					if nth == 0 {
						break; // close with the query unanswered
					}
					let reply = answer(&msg);
					let framed = [&(reply.len() as u16).to_be_bytes()[..], &reply].concat();
					if stream.write_all(&framed).is_err() {
						break;
					}
				}
			}
		});
	}

	let mut cfg = Config::new(target, Transport::Tcp);
	cfg.timeout_ms = 5000;
	cfg.max_clients = 4;

	let (put, get) = pipeline::channel::spsc(16);
	let worker = Worker::spawn("replay-test", cfg, get).unwrap();

	put.put(routed(0, &query(0x7777)));
	put.close();
	drop(put);

	let report = worker.finish().unwrap();
	done.store(true, Ordering::Relaxed);

	// The query was orphaned by the first connection's death and re-sent
	// over a second one.
	assert_eq!(report.sum.answers, 1);
	assert_eq!(report.sum.rcode_noerror, 1);
	assert!(conns.load(Ordering::Relaxed) >= 2);
}

#[test]
fn unroutable_chain_is_discarded() {
	let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
	let target: SocketAddr = socket.local_addr().unwrap();

	let cfg = Config::new(target, Transport::Udp);

	let (put, get) = pipeline::channel::spsc(16);
	let worker = Worker::spawn("replay-test", cfg, get).unwrap();

	let bytes = query(1);

	// An empty chain, one with a payload but no enclosing IP layer, and a
	// routed packet whose transport payload is empty.
	put.put(Chain::new().copy(Kind::ALL));
	put.put({
		let mut chain = Chain::new();
		chain.push(Layer::Payload(Payload { bytes: &bytes, padding: 0 }));
		chain.copy(Kind::ALL)
	});
	put.put(routed(0, &[]));
	put.close();
	drop(put);

	let report = worker.finish().unwrap();
	assert_eq!(report.processed, 3);
	assert_eq!(report.discarded, 3);
	assert_eq!(report.sum.requests, 0);
}
