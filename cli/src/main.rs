//! `dnsplay`: replay captured DNS traffic against a resolver under test and
//! measure per-response latency and RCODEs.
//!
//! The pipeline is: capture reader -> timing filter -> layer decoder ->
//! client-routing filter -> one ring channel per replay worker -> replay
//! client. Workers report their statistics when the ingest side drains.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use log::LevelFilter;
use runtime::Logger;
use utils::error::*;

use pipeline::channel::{self, Put};
use replay::client::{Config, H2Method, Https2Config, Transport, Worker};
use replay::ipsplit::{self, IpSplit};
use replay::respdiff::Respdiff;
use replay::stats::Report;
use replay::timing::{Mode, Timing};
use wire::object::{Kind, OwnedChain, Pcap};
use wire::pcap::{Codec, CompressedReader, FileReader, Meta, MmapReader, Writer};

mod summary;

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
enum TransportArg {
	/// UDP only
	Udp,
	/// UDP with TCP fallback on truncation
	Auto,
	Tcp,
	Tls,
	Https2,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
enum MethodArg {
	Post,
	Get,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
enum SplitArg {
	RoundRobin,
	Weighted,
	Random,
}

#[derive(Parser, Debug)]
#[command(name = "dnsplay", version, about = "Replay captured DNS traffic against a resolver and measure the responses")]
struct Args {
	/// Capture file; .gz, .zst, .lz4 and .xz are decompressed on the fly
	input: PathBuf,

	/// Resolver to replay against
	#[arg(short, long)]
	target: Option<SocketAddr>,

	#[arg(long, value_enum, default_value = "udp")]
	transport: TransportArg,

	/// Memory-map the capture instead of streaming it
	#[arg(long)]
	mmap: bool,

	/// Decode and count packets without replaying them
	#[arg(long)]
	dry_run: bool,

	/// Replay worker threads
	#[arg(short, long, default_value_t = 1)]
	workers: usize,

	/// Ring-channel capacity per worker (power of two)
	#[arg(long, default_value_t = 256)]
	channel_size: usize,

	/// Widen every captured gap by this many nanoseconds
	#[arg(long, conflicts_with_all = ["reduce", "multiply", "fixed", "realtime"])]
	increase: Option<u64>,

	/// Shrink every captured gap by this many nanoseconds
	#[arg(long, conflicts_with_all = ["multiply", "fixed", "realtime"])]
	reduce: Option<u64>,

	/// Scale every captured gap by this factor
	#[arg(long, conflicts_with_all = ["fixed", "realtime"])]
	multiply: Option<f64>,

	/// Replace every gap with this many nanoseconds
	#[arg(long, conflicts_with = "realtime")]
	fixed: Option<u64>,

	/// Pace the replay against the wall clock
	#[arg(long)]
	realtime: bool,

	/// Packets per wall-clock check in realtime mode
	#[arg(long, default_value_t = 64)]
	rt_batch: u64,

	/// Abort when the replay falls this many nanoseconds behind
	#[arg(long, default_value_t = 1_000_000_000)]
	rt_drift: u64,

	#[arg(long, default_value_t = 2000)]
	timeout_ms: u64,

	#[arg(long, default_value_t = 5000)]
	handshake_timeout_ms: u64,

	/// Keep drained connections around this long for reuse
	#[arg(long)]
	idle_timeout_ms: Option<u64>,

	#[arg(long, default_value_t = 1000)]
	stats_interval_ms: u64,

	#[arg(long, default_value_t = 1024)]
	max_clients: usize,

	/// UDP sockets kept for reuse after a successful exchange
	#[arg(long, default_value_t = 128)]
	max_reuse_clients: usize,

	/// Source addresses rotated through when binding outgoing sockets
	#[arg(long = "source")]
	sources: Vec<IpAddr>,

	/// TLS server name; defaults to the target address
	#[arg(long)]
	tls_sni: Option<String>,

	#[arg(long, value_enum, default_value = "post")]
	doh_method: MethodArg,

	#[arg(long, default_value = "/dns-query")]
	doh_path: String,

	#[arg(long)]
	doh_authority: Option<String>,

	/// Bound on the assembled URI path in DoH GET mode
	#[arg(long, default_value_t = 512)]
	doh_max_uri_len: usize,

	/// Write paired query/answer databases here for offline diffing
	#[arg(long)]
	respdiff: Option<PathBuf>,

	/// Write the decoded capture back out as PCAP
	#[arg(long)]
	pcap_out: Option<PathBuf>,

	/// Dump the merged statistics as JSON
	#[arg(long)]
	json: Option<PathBuf>,

	#[arg(long, value_enum, default_value = "round-robin")]
	split: SplitArg,

	/// Per-worker weights for --split weighted
	#[arg(long = "weight")]
	weights: Vec<u32>,

	/// Seed for --split random
	#[arg(long)]
	seed: Option<u64>,

	/// More logging; repeat for debug and trace
	#[arg(short, long, action = clap::ArgAction::Count)]
	verbose: u8,

	/// Warnings and errors only
	#[arg(short, long, conflicts_with = "verbose")]
	quiet: bool,
}

enum Input {
	File(FileReader),
	Mmap(MmapReader),
	Compressed(CompressedReader),
}

impl Input {
	fn open(args: &Args) -> Result<Self> {
		if let Some(codec) = Codec::from_path(&args.input) {
			if args.mmap {
				log::warn!("--mmap is ignored for compressed captures");
			}
			return Ok(Self::Compressed(CompressedReader::open(&args.input, codec)?));
		}
		if args.mmap {
			return Ok(Self::Mmap(MmapReader::open(&args.input)?));
		}
		Ok(Self::File(FileReader::open(&args.input)?))
	}

	fn meta(&self) -> &Meta {
		match self {
			Self::File(reader) => reader.meta(),
			Self::Mmap(reader) => reader.meta(),
			Self::Compressed(reader) => reader.meta(),
		}
	}

	fn produce(&mut self) -> Result<Option<Pcap<'_>>> {
		match self {
			Self::File(reader) => reader.produce(),
			Self::Mmap(reader) => reader.produce(),
			Self::Compressed(reader) => reader.produce(),
		}
	}
}

fn timing_mode(args: &Args) -> Mode {
	if let Some(ns) = args.increase {
		Mode::Increase(ns)
	} else if let Some(ns) = args.reduce {
		Mode::Reduce(ns)
	} else if let Some(mul) = args.multiply {
		Mode::Multiply(mul)
	} else if let Some(ns) = args.fixed {
		Mode::Fixed(ns)
	} else if args.realtime {
		Mode::RealTime { batch: args.rt_batch, drift: args.rt_drift }
	} else {
		Mode::Keep
	}
}

fn client_config(args: &Args, target: SocketAddr, respdiff: Option<Arc<Respdiff>>) -> Config {
	let mut cfg = Config::new(
		target,
		match args.transport {
			TransportArg::Udp => Transport::Udp,
			TransportArg::Auto => Transport::UdpTcp,
			TransportArg::Tcp => Transport::Tcp,
			TransportArg::Tls => Transport::Tls,
			TransportArg::Https2 => Transport::Https2,
		},
	);

	cfg.timeout_ms = args.timeout_ms;
	cfg.handshake_timeout_ms = args.handshake_timeout_ms;
	cfg.idle_timeout_ms = args.idle_timeout_ms;
	cfg.stats_interval_ms = args.stats_interval_ms;
	cfg.max_clients = args.max_clients;
	cfg.max_reuse_clients = args.max_reuse_clients;
	cfg.sources = args.sources.clone();
	cfg.tls_sni = args.tls_sni.clone();
	cfg.h2 = Https2Config {
		method: match args.doh_method {
			MethodArg::Post => H2Method::Post,
			MethodArg::Get => H2Method::Get,
		},
		authority: args.doh_authority.clone(),
		path: args.doh_path.clone(),
		max_uri_len: args.doh_max_uri_len,
	};
	cfg.respdiff = respdiff;
	cfg
}

fn main() -> ExitCode {
	let args = Args::parse();

	Logger::init(if args.quiet {
		LevelFilter::Warn
	} else {
		match args.verbose {
			0 => LevelFilter::Info,
			1 => LevelFilter::Debug,
			_ => LevelFilter::Trace,
		}
	});

	match run(args) {
		Ok(()) => ExitCode::SUCCESS,
		Err(()) => ExitCode::FAILURE,
	}
}

fn run(args: Args) -> Result {
	runtime::install_exit_handler()?;

	let mut input = Input::open(&args)?;
	let mut timing = Timing::new(timing_mode(&args));

	let mut pcap_out = match &args.pcap_out {
		Some(path) => {
			let meta = input.meta();
			Some(Writer::create(path, meta.network, meta.snaplen, meta.is_nanosec)?)
		}
		None => None,
	};

	if args.dry_run {
		return dry_run(&mut input, &mut timing, pcap_out.as_mut());
	}

	let Some(target) = args.target else {
		log::error!("--target is required unless --dry-run is given");
		return Err(());
	};

	// Fail configuration problems before any traffic moves.
	if let Some(sni) = &args.tls_sni {
		if replay::client::server_name_is_valid(sni).is_err() {
			log::error!("invalid TLS server name: {sni}");
			return Err(());
		}
	}
	if args.workers == 0 {
		log::error!("at least one worker is required");
		return Err(());
	}
	if args.split == SplitArg::Weighted && !args.weights.is_empty() && args.weights.len() != args.workers {
		log::error!("--weight must be given once per worker");
		return Err(());
	}
	if args.weights.iter().any(|&w| w == 0) {
		log::error!("--weight must be positive");
		return Err(());
	}
	if args.channel_size < 4 || !args.channel_size.is_power_of_two() {
		log::error!("--channel-size must be a power of two, at least 4");
		return Err(());
	}

	let respdiff = match &args.respdiff {
		Some(path) => Some(Arc::new(Respdiff::open(path)?)),
		None => None,
	};
	let started_unix = runtime::time::unix_ms();

	// One ring channel per worker; the routing filter owns the put side.
	let mut workers = Vec::with_capacity(args.workers);
	let mut split: IpSplit<Put<OwnedChain>> = IpSplit::new(
		match args.split {
			SplitArg::RoundRobin => ipsplit::Mode::RoundRobin,
			SplitArg::Weighted => ipsplit::Mode::Weighted,
			SplitArg::Random => ipsplit::Mode::Random,
		},
		Kind::Ip.bit() | Kind::Ip6.bit() | Kind::Udp.bit() | Kind::Tcp.bit() | Kind::Payload.bit(),
	);
	if let Some(seed) = args.seed {
		split.seed(seed);
	}

	for n in 0..args.workers {
		let (put, get) = channel::spsc(args.channel_size);
		let cfg = client_config(&args, target, respdiff.clone());
		workers.push(Worker::spawn(format!("replay-{n}"), cfg, get)?);
		split.add(put, args.weights.get(n).copied().unwrap_or(1));
	}

	// Ingest: read, re-time, decode, route.
	let mut failed = false;
	let mut decode_discarded: u64 = 0;

	loop {
		if runtime::exit_requested() {
			log::info!("interrupted, draining");
			break;
		}

		let pkt = match input.produce() {
			Ok(Some(pkt)) => pkt,
			Ok(None) => break,
			Err(()) => {
				// Already logged; stop ingesting and drain what made it.
				failed = true;
				break;
			}
		};

		if let Some(writer) = pcap_out.as_mut() {
			let _ = writer.write(&pkt);
		}

		if timing.delay(pkt.ts).is_err() {
			failed = true;
			break;
		}

		match wire::layer::decode(&pkt) {
			Some(mut chain) => split.route(&mut chain),
			None => decode_discarded += 1,
		}
	}

	let routing_discarded = split.discarded;
	drop(split); // closes every worker's channel

	let mut report = Report::default();
	for worker in workers {
		report.merge(&worker.finish()?);
	}

	if let Some(respdiff) = &respdiff {
		respdiff.commit(
			"capture",
			&target.to_string(),
			(started_unix / 1000) as u32,
			(runtime::time::unix_ms() / 1000) as u32,
		)?;
	}

	summary::print(&report, decode_discarded + routing_discarded, args.timeout_ms);

	if let Some(path) = &args.json {
		let file = std::fs::File::create(path).map_err(|err| log::error!("unable to create {}: {err}", path.display()))?;
		serde_json::to_writer_pretty(file, &report).map_err(|err| log::error!("stats dump failed: {err}"))?;
	}

	if failed {
		return Err(());
	}
	Ok(())
}

/// Decode and count without replaying.
fn dry_run(input: &mut Input, timing: &mut Timing, mut pcap_out: Option<&mut Writer>) -> Result {
	let mut null = pipeline::sink::Null::default();
	let mut discarded: u64 = 0;

	loop {
		if runtime::exit_requested() {
			break;
		}
		let Some(pkt) = input.produce()? else { break };

		if let Some(writer) = pcap_out.as_mut() {
			writer.write(&pkt)?;
		}
		timing.delay(pkt.ts)?;

		match wire::layer::decode(&pkt) {
			Some(chain) => pipeline::Receive::receive(&mut null, &chain),
			None => discarded += 1,
		}
	}

	log::info!("dry run: {} packets decoded, {} discarded", null.count, discarded);
	Ok(())
}
