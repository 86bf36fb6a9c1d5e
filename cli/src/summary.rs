//! The end-of-run report printed to stdout.

use replay::stats::{Report, Stats};

/// The latency below which `fraction` of the answered requests fell, read
/// off the 1-ms histogram.
fn percentile(latency: &[u64], fraction: f64) -> u64 {
	let total: u64 = latency.iter().sum();
	if total == 0 {
		return 0;
	}

	let want = (total as f64 * fraction).ceil() as u64;
	let mut seen = 0;
	for (ms, count) in latency.iter().enumerate() {
		seen += count;
		if seen >= want {
			return ms as u64;
		}
	}
	latency.len() as u64 - 1
}

fn print_rcodes(sum: &Stats) {
	let rcodes = [
		("noerror", sum.rcode_noerror),
		("formerr", sum.rcode_formerr),
		("servfail", sum.rcode_servfail),
		("nxdomain", sum.rcode_nxdomain),
		("notimp", sum.rcode_notimp),
		("refused", sum.rcode_refused),
		("yxdomain", sum.rcode_yxdomain),
		("yxrrset", sum.rcode_yxrrset),
		("nxrrset", sum.rcode_nxrrset),
		("notauth", sum.rcode_notauth),
		("notzone", sum.rcode_notzone),
		("badvers", sum.rcode_badvers),
		("badkey", sum.rcode_badkey),
		("badtime", sum.rcode_badtime),
		("badmode", sum.rcode_badmode),
		("badname", sum.rcode_badname),
		("badalg", sum.rcode_badalg),
		("badtrunc", sum.rcode_badtrunc),
		("badcookie", sum.rcode_badcookie),
		("other", sum.rcode_other),
	];

	for (name, count) in rcodes {
		if count > 0 {
			println!("  rcode {name:9} {count:>10}");
		}
	}
}

pub fn print(report: &Report, ingest_discarded: u64, timeout_ms: u64) {
	let sum = &report.sum;
	let timeouts = sum.latency.last().copied().unwrap_or(0);

	println!("== replay summary ==");
	println!("  packets     {:>10}  (discarded before replay: {})", report.processed, ingest_discarded);
	println!("  discarded   {:>10}", report.discarded);
	println!("  requests    {:>10}", sum.requests);
	println!("  answers     {:>10}", sum.answers);
	println!("  timeouts    {:>10}  (at {timeout_ms} ms)", timeouts);
	println!(
		"  handshakes  {:>10}  (failed: {}, resumed: {})",
		sum.conn_handshakes, sum.conn_handshakes_failed, sum.conn_resumed
	);

	print_rcodes(sum);

	if sum.answers > 0 {
		println!(
			"  latency ms  p50 {}  p90 {}  p99 {}",
			percentile(&sum.latency, 0.50),
			percentile(&sum.latency, 0.90),
			percentile(&sum.latency, 0.99)
		);
	}

	let span_ms = sum.until_ms.saturating_sub(sum.since_ms);
	if span_ms > 0 && sum.requests > 0 {
		println!("  rate        {:.1} q/s over {:.1} s", sum.requests as f64 * 1000.0 / span_ms as f64, span_ms as f64 / 1000.0);
	}
}
