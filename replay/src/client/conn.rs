//! TCP and TLS transport: per-client connection supervision, RFC 1035
//! stream framing, and the read state machine reassembling length-prefixed
//! messages out of arbitrary read chunks.

use std::collections::VecDeque;
use std::io::IoSlice;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::mpsc;
use utils::error::*;
use wire::dns::Dns;

use super::{Answer, Engine, Query, QueryState, Transport};

/// Room for a maximum-size message, its length prefix, and a TLS record's
/// worth of slack.
const WIRE_BUF: usize = 65535 + 2 + 16384;

pub(crate) fn tls_config(alpn: &[u8]) -> Arc<rustls::ClientConfig> {
	let provider = Arc::new(rustls::crypto::ring::default_provider());

	let mut config = rustls::ClientConfig::builder_with_provider(provider.clone())
		.with_protocol_versions(rustls::ALL_VERSIONS)
		.expect("provider supports the default protocol versions")
		.dangerous()
		.with_custom_certificate_verifier(Arc::new(AnyServerCert { provider }))
		.with_no_client_auth();

	config.alpn_protocols = vec![alpn.to_vec()];
	Arc::new(config)
}

/// Accepts any server certificate; signatures themselves are still checked
/// so the handshake stays well-formed.
#[derive(Debug)]
struct AnyServerCert {
	provider: Arc<rustls::crypto::CryptoProvider>,
}

impl ServerCertVerifier for AnyServerCert {
	fn verify_server_cert(
		&self,
		_end_entity: &CertificateDer<'_>,
		_intermediates: &[CertificateDer<'_>],
		_server_name: &ServerName<'_>,
		_ocsp_response: &[u8],
		_now: UnixTime,
	) -> core::result::Result<ServerCertVerified, rustls::Error> {
		Ok(ServerCertVerified::assertion())
	}

	fn verify_tls12_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> core::result::Result<HandshakeSignatureValid, rustls::Error> {
		rustls::crypto::verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
	}

	fn verify_tls13_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> core::result::Result<HandshakeSignatureValid, rustls::Error> {
		rustls::crypto::verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
	}

	fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
		self.provider.signature_verification_algorithms.supported_schemes()
	}
}

pub(crate) enum ConnStream {
	Tcp(TcpStream),
	Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

/// Open a connection to the target, within the handshake deadline. For the
/// TLS-based transports this covers the TLS handshake as well.
pub(crate) async fn connect(engine: &Engine) -> Result<ConnStream> {
	engine.stat_both(|s| s.conn_handshakes += 1);

	let attempt = async {
		let socket = match engine.cfg.target {
			SocketAddr::V4(_) => TcpSocket::new_v4(),
			SocketAddr::V6(_) => TcpSocket::new_v6(),
		}
		.map_err(|err| log::warn!("failed to create tcp socket: {err}"))?;

		// Bind before connect, to send from rotating source addresses.
		if let Some(ip) = engine.next_source() {
			socket.bind((ip, 0).into()).map_err(|err| log::warn!("failed to bind to address: {err}"))?;
		}

		let stream = socket
			.connect(engine.cfg.target)
			.await
			.map_err(|err| log::info!("tcp connect failed: {err}"))?;

		if let Err(err) = stream.set_nodelay(true) {
			log::warn!("failed to set TCP_NODELAY: {err}");
		}

		if matches!(engine.cfg.transport, Transport::Tls | Transport::Https2) {
			let connector = tokio_rustls::TlsConnector::from(engine.tls());
			let stream = connector
				.connect(engine.server_name(), stream)
				.await
				.map_err(|err| log::info!("tls handshake failed: {err}"))?;

			if stream.get_ref().1.handshake_kind() == Some(rustls::HandshakeKind::Resumed) {
				engine.stat_both(|s| s.conn_resumed += 1);
			}

			Ok(ConnStream::Tls(Box::new(stream)))
		} else {
			Ok(ConnStream::Tcp(stream))
		}
	};

	match tokio::time::timeout(Duration::from_millis(engine.cfg.handshake_timeout_ms), attempt).await {
		Ok(Ok(stream)) => Ok(stream),
		Ok(Err(())) => {
			engine.stat_both(|s| s.conn_handshakes_failed += 1);
			Err(())
		}
		Err(_) => {
			log::info!("connection handshake timed out");
			engine.stat_both(|s| s.conn_handshakes_failed += 1);
			Err(())
		}
	}
}

/// Why a connection ended.
enum ConnEnd {
	/// Closed (idle, error, or peer); pending queries may remain.
	Closed,
	/// The input is exhausted and everything drained.
	Finished,
}

/// One client slot's connection supervisor: holds the pending-query list,
/// keeps at most one connection open, and re-delivers orphaned queries over
/// a fresh connection after a close.
pub(crate) async fn supervise(engine: Rc<Engine>, mut rx: mpsc::UnboundedReceiver<Query>) {
	let mut pending: VecDeque<Query> = VecDeque::new();
	let mut rx_open = true;

	loop {
		// Queries whose request has already timed out are dropped here.
		pending.retain(|q| !q.answer.is_closed());

		if pending.is_empty() {
			if !rx_open {
				return;
			}
			match rx.recv().await {
				Some(query) => pending.push_back(query),
				None => return,
			}
		}
		while let Ok(query) = rx.try_recv() {
			pending.push_back(query);
		}

		match connect(&engine).await {
			Ok(stream) => {
				engine.stat_current(|s| s.conn_active += 1);

				let end = match stream {
					ConnStream::Tcp(stream) => run_conn(&engine, stream, &mut pending, &mut rx, &mut rx_open).await,
					ConnStream::Tls(stream) => run_conn(&engine, *stream, &mut pending, &mut rx, &mut rx_open).await,
				};

				engine.stat_current(|s| s.conn_active = s.conn_active.saturating_sub(1));

				if matches!(end, ConnEnd::Finished) && pending.is_empty() && !rx_open {
					return;
				}
			}
			Err(()) => {
				// Setup failed; back off briefly, then retry whatever is
				// still pending.
				tokio::time::sleep(Duration::from_millis(10)).await;
			}
		}
	}
}

/// Issue the 2-byte length prefix and the message as one gathered write.
async fn write_query<S: AsyncWrite + Unpin>(stream: &mut S, payload: &[u8]) -> std::io::Result<()> {
	let len = (payload.len() as u16).to_be_bytes();

	let mut wrote = stream.write_vectored(&[IoSlice::new(&len), IoSlice::new(payload)]).await?;
	if wrote < 2 {
		stream.write_all(&len[wrote..]).await?;
		wrote = 2;
	}
	stream.write_all(&payload[wrote - 2..]).await?;
	stream.flush().await
}

fn orphan(sent: &mut Vec<Query>, pending: &mut VecDeque<Query>) {
	for mut query in sent.drain(..).rev() {
		query.state = QueryState::Orphaned;
		pending.push_front(query);
	}
}

async fn run_conn<S: AsyncRead + AsyncWrite + Unpin>(
	engine: &Engine,
	mut stream: S,
	pending: &mut VecDeque<Query>,
	rx: &mut mpsc::UnboundedReceiver<Query>,
	rx_open: &mut bool,
) -> ConnEnd {
	let mut sent: Vec<Query> = Vec::new();
	let mut reader = StreamReader::new();
	let mut buf = vec![0u8; WIRE_BUF];

	loop {
		sent.retain(|q| !q.answer.is_closed());

		while let Some(mut query) = pending.pop_front() {
			if query.answer.is_closed() {
				continue;
			}

			query.state = QueryState::PendingWriteCb;
			log::debug!("write dnsmsg id: {:04x}", query.id);

			match write_query(&mut stream, &query.payload).await {
				Ok(()) => {
					query.state = QueryState::Sent;
					sent.push(query);
				}
				Err(err) => {
					log::info!("write failed: {err}");
					query.state = QueryState::WriteFailed;
					// The failed query is retried over the next connection,
					// along with everything already sent on this one.
					pending.push_front(query);
					orphan(&mut sent, pending);
					return ConnEnd::Closed;
				}
			}
		}

		let drained = sent.is_empty() && pending.is_empty();
		if drained && !*rx_open {
			return ConnEnd::Finished;
		}
		if drained && engine.cfg.idle_timeout_ms.is_none() {
			// Nothing outstanding and no idle allowance.
			return ConnEnd::Closed;
		}

		let nap = if drained {
			Duration::from_millis(engine.cfg.idle_timeout_ms.unwrap())
		} else {
			// Housekeeping tick to notice request timeouts.
			Duration::from_millis(100)
		};

		tokio::select! {
			item = rx.recv(), if *rx_open => match item {
				Some(query) => pending.push_back(query),
				None => *rx_open = false,
			},
			got = stream.read(&mut buf) => match got {
				Ok(0) => {
					log::info!("connection unexpectedly closed by peer");
					orphan(&mut sent, pending);
					return ConnEnd::Closed;
				}
				Ok(n) => {
					if deliver(engine, &mut reader, &buf[..n], &mut sent).is_err() {
						log::warn!("lost orientation in DNS stream, closing");
						orphan(&mut sent, pending);
						return ConnEnd::Closed;
					}
				}
				Err(err) => {
					log::info!("connection read error: {err}");
					orphan(&mut sent, pending);
					return ConnEnd::Closed;
				}
			},
			_ = tokio::time::sleep(nap) => {
				if drained {
					log::debug!("closing idle connection");
					return ConnEnd::Closed;
				}
			}
		}
	}
}

/// Run a chunk through the read state machine and answer every completed
/// message's query.
fn deliver(engine: &Engine, reader: &mut StreamReader, chunk: &[u8], sent: &mut Vec<Query>) -> Result {
	reader.feed(chunk, |unit| {
		let mut dns = Dns::new(unit);
		if dns.parse_header().is_err() {
			log::warn!("response malformed");
			return Err(());
		}
		log::debug!("recv dnsmsg id: {:04x}", dns.id);

		// QNAME/QTYPE/QCLASS checking is omitted; the message id is unique
		// per connection.
		if let Some(at) = sent.iter().position(|q| q.id == dns.id) {
			let query = sent.remove(at);
			let wire = engine.capture_wire().then(|| Bytes::copy_from_slice(unit));
			let _ = query.answer.send(Answer { rcode: dns.rcode, wire });
		} else {
			log::debug!("response msgid {:04x} matches no sent query", dns.id);
		}
		Ok(())
	})
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ReadState {
	/// Expecting the 2 bytes of the length prefix.
	DnsLen,
	/// Expecting `need` bytes of message.
	DnsMsg,
}

/// Reassembles length-prefixed DNS messages from arbitrary stream chunks.
/// When a whole unit is available in the input it is borrowed directly;
/// otherwise the partial bytes accumulate in an owned buffer until the unit
/// completes.
pub(crate) struct StreamReader {
	state: ReadState,
	need: usize,
	pos: usize,
	buf: Vec<u8>,
	partial: bool,
}

impl StreamReader {
	pub fn new() -> Self {
		Self {
			state: ReadState::DnsLen,
			need: 2,
			pos: 0,
			buf: Vec::new(),
			partial: false,
		}
	}

	/// Consume a chunk, invoking `msg` for every completed message. A chunk
	/// may complete zero or more messages. `Err` means the stream framing
	/// broke and the connection must go down.
	pub fn feed(&mut self, mut data: &[u8], mut msg: impl FnMut(&[u8]) -> Result) -> Result {
		while !data.is_empty() {
			let expected = self.need - self.pos;

			if !self.partial && expected > data.len() {
				// Too little input to finish the unit; start accumulating.
				self.buf.resize(self.need, 0);
				self.partial = true;
			}

			let unit = if self.partial {
				let take = expected.min(data.len());
				self.buf[self.pos..self.pos + take].copy_from_slice(&data[..take]);
				self.pos += take;
				data = &data[take..];

				if self.pos < self.need {
					continue;
				}
				&self.buf[..self.need]
			} else {
				let unit = &data[..expected];
				data = &data[expected..];
				unit
			};

			match self.state {
				ReadState::DnsLen => {
					let dnslen = u16::from_be_bytes([unit[0], unit[1]]) as usize;
					if dnslen == 0 {
						log::warn!("invalid dnslen received: 0");
						self.need = 2;
					} else if dnslen < 12 {
						log::debug!("invalid dnslen received: {dnslen}");
						return Err(());
					} else {
						log::debug!("dnslen: {dnslen}");
						self.state = ReadState::DnsMsg;
						self.need = dnslen;
					}
				}
				ReadState::DnsMsg => {
					msg(unit)?;
					self.state = ReadState::DnsLen;
					self.need = 2;
				}
			}

			self.pos = 0;
			self.partial = false;
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn framed(msg: &[u8]) -> Vec<u8> {
		let mut out = (msg.len() as u16).to_be_bytes().to_vec();
		out.extend_from_slice(msg);
		out
	}

	fn msg(id: u16) -> Vec<u8> {
		let mut out = id.to_be_bytes().to_vec();
		out.extend_from_slice(&[0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
		out
	}

	#[test]
	fn single_chunk_many_messages() {
		let mut stream = framed(&msg(1));
		stream.extend_from_slice(&framed(&msg(2)));
		stream.extend_from_slice(&framed(&msg(3)));

		let mut seen = Vec::new();
		let mut reader = StreamReader::new();
		reader
			.feed(&stream, |unit| {
				seen.push(u16::from_be_bytes([unit[0], unit[1]]));
				Ok(())
			})
			.unwrap();

		assert_eq!(seen, [1, 2, 3]);
	}

	#[test]
	fn byte_at_a_time() {
		let stream = framed(&msg(0x1234));

		let mut seen = Vec::new();
		let mut reader = StreamReader::new();
		for byte in stream {
			reader
				.feed(&[byte], |unit| {
					seen.push(unit.to_vec());
					Ok(())
				})
				.unwrap();
		}

		assert_eq!(seen, [msg(0x1234)]);
	}

	#[test]
	fn split_across_length_boundary() {
		let stream = framed(&msg(7));

		let mut seen = 0;
		let mut reader = StreamReader::new();
		// One byte of length, then the rest.
		reader.feed(&stream[..1], |_| unreachable!()).unwrap();
		reader
			.feed(&stream[1..], |_| {
				seen += 1;
				Ok(())
			})
			.unwrap();

		assert_eq!(seen, 1);
	}

	#[test]
	fn zero_length_resets() {
		let mut stream = vec![0, 0];
		stream.extend_from_slice(&framed(&msg(9)));

		let mut seen = 0;
		let mut reader = StreamReader::new();
		reader
			.feed(&stream, |_| {
				seen += 1;
				Ok(())
			})
			.unwrap();

		assert_eq!(seen, 1);
	}

	#[test]
	fn short_length_is_fatal() {
		let mut reader = StreamReader::new();
		assert!(reader.feed(&[0, 5], |_| unreachable!()).is_err());
	}

	#[test]
	fn message_error_propagates() {
		let stream = framed(&msg(1));

		let mut reader = StreamReader::new();
		assert!(reader.feed(&stream, |_| Err(())).is_err());
	}
}
