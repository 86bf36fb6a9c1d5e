//! UDP transport: one socket per in-flight query, with successful sockets
//! kept on a reuse free-list. Responses are matched by message id; a
//! truncated response either escalates to TCP (transport auto mode) or
//! leaves the request to run out its deadline.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use utils::error::*;
use wire::dns::Dns;

use super::{Answer, Engine, Transport};

enum Outcome {
	Answer(Answer),
	Truncated,
}

pub(crate) async fn request(engine: Rc<Engine>, client: u32, qid: u16, payload: Bytes, started: Instant) {
	let deadline = started + Duration::from_millis(engine.cfg.timeout_ms);

	match tokio::time::timeout_at(deadline, exchange(&engine, qid, &payload)).await {
		Ok(Ok(Outcome::Answer(answer))) => engine.answered(started, answer, &payload),
		Ok(Ok(Outcome::Truncated)) => {
			if engine.cfg.transport == Transport::UdpTcp {
				log::debug!("udp response has TC=1, re-sending over TCP");
				let rx = Engine::enqueue(&engine, client, qid, payload.clone());
				match tokio::time::timeout_at(deadline, rx).await {
					Ok(Ok(answer)) => engine.answered(started, answer, &payload),
					_ => engine.unanswered(),
				}
			} else {
				log::debug!("udp response has TC=1");
				tokio::time::sleep_until(deadline).await;
				engine.unanswered();
			}
		}
		// The exchange failed outright; the request still accounts for the
		// full timeout.
		Ok(Err(())) => {
			tokio::time::sleep_until(deadline).await;
			engine.unanswered();
		}
		Err(_) => engine.unanswered(),
	}
}

fn unspecified(target: SocketAddr) -> SocketAddr {
	match target {
		SocketAddr::V4(_) => (IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0).into(),
		SocketAddr::V6(_) => (IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0).into(),
	}
}

async fn exchange(engine: &Engine, qid: u16, payload: &Bytes) -> Result<Outcome> {
	let socket = match engine.pooled_udp() {
		Some(socket) => socket,
		None => {
			let bind = match engine.next_source() {
				Some(ip) => SocketAddr::from((ip, 0)),
				None => unspecified(engine.cfg.target),
			};
			let socket = UdpSocket::bind(bind)
				.await
				.map_err(|err| log::warn!("failed to bind udp socket: {err}"))?;
			socket
				.connect(engine.cfg.target)
				.await
				.map_err(|err| log::warn!("failed to connect udp socket: {err}"))?;
			socket
		}
	};

	socket
		.send(payload)
		.await
		.map_err(|err| log::warn!("failed to send udp packet: {err}"))?;

	let mut buf = vec![0; 65535];
	loop {
		let n = socket
			.recv(&mut buf)
			.await
			.map_err(|err| log::warn!("udp recv failed: {err}"))?;
		log::debug!("udp recv: {n}");

		// A zero-length datagram is legitimate; keep listening.
		if n == 0 {
			continue;
		}

		let mut dns = Dns::new(&buf[..n]);
		if dns.parse_header().is_err() {
			log::debug!("udp response malformed");
			continue;
		}
		if dns.id != qid {
			log::debug!("udp response msgid mismatch {:04x}(q) != {:04x}(a)", qid, dns.id);
			continue;
		}
		if dns.tc {
			return Ok(Outcome::Truncated);
		}

		let wire = engine.capture_wire().then(|| Bytes::copy_from_slice(&buf[..n]));
		// Only sockets whose request succeeded go back on the free-list.
		engine.reuse_udp(socket);
		return Ok(Outcome::Answer(Answer { rcode: dns.rcode, wire }));
	}
}
