//! Reshapes the inter-arrival timing of captured records before they enter
//! the replay path. Five offline modes rework the captured gaps; the online
//! mode paces batches against the wall clock and aborts when the replay
//! falls too far behind the capture.

use runtime::time::{self, Timespec};
use utils::error::*;

use wire::object::Ts;

#[derive(Clone, Copy, Debug)]
pub enum Mode {
	/// Preserve the capture timing.
	Keep,
	/// Captured gap plus a constant offset in nanoseconds.
	Increase(u64),
	/// Captured gap minus a constant offset in nanoseconds, clamped at 0.
	Reduce(u64),
	/// Captured gap scaled by a factor.
	Multiply(f64),
	/// A constant gap in nanoseconds, ignoring the capture.
	Fixed(u64),
	/// Pace `batch`-sized groups against the wall clock; abort when real
	/// time runs ahead of the capture by `drift` nanoseconds or more.
	RealTime { batch: u64, drift: u64 },
}

struct State {
	/// Monotonic minus capture time at the first packet (keep mode).
	diff: Timespec,
	last_pkt_ts: Timespec,
	/// Monotonic time after the previous delay.
	last_ts: Timespec,
	/// Monotonic time at the first packet.
	first_ts: Timespec,
	/// The mode parameter; for realtime, the first capture timestamp.
	mod_ts: Timespec,
	counter: u64,
}

pub struct Timing {
	mode: Mode,
	state: Option<State>,
}

fn capture_ts(ts: Ts) -> Timespec {
	Timespec::new(ts.sec as i64, ts.nsec as i64)
}

impl Timing {
	pub fn new(mode: Mode) -> Self {
		Self { mode, state: None }
	}

	/// Sleep until the record's desired delivery moment. The first record
	/// establishes the reference point and is forwarded immediately.
	pub fn delay(&mut self, ts: Ts) -> Result {
		let pkt_ts = capture_ts(ts);

		let Some(state) = self.state.as_mut() else {
			let now = time::monotonic();

			let mod_ts = match self.mode {
				Mode::Increase(ns) | Mode::Reduce(ns) | Mode::Fixed(ns) => Timespec::from_nanos(ns),
				Mode::RealTime { .. } => pkt_ts,
				Mode::Keep | Mode::Multiply(_) => Timespec::default(),
			};

			log::debug!("timing init, now {}.{:09}", now.sec, now.nsec);

			self.state = Some(State {
				diff: now.sub(pkt_ts),
				last_pkt_ts: pkt_ts,
				last_ts: now,
				first_ts: now,
				mod_ts,
				counter: 0,
			});
			return Ok(());
		};

		match self.mode {
			Mode::Keep => {
				time::sleep_until(state.diff.add(pkt_ts));
				state.last_pkt_ts = pkt_ts;
			}
			Mode::Increase(_) => {
				let gap = pkt_ts.sub(state.last_pkt_ts).add(state.mod_ts);
				Self::gap_sleep(state, pkt_ts, gap);
			}
			Mode::Reduce(_) => {
				let gap = pkt_ts.sub(state.last_pkt_ts).sub(state.mod_ts);
				Self::gap_sleep(state, pkt_ts, gap);
			}
			Mode::Multiply(mul) => {
				let gap = pkt_ts.sub(state.last_pkt_ts).scale(mul);
				Self::gap_sleep(state, pkt_ts, gap);
			}
			Mode::Fixed(_) => {
				Self::gap_sleep(state, pkt_ts, state.mod_ts);
			}
			Mode::RealTime { batch, drift } => {
				state.counter += 1;
				if state.counter >= batch {
					state.counter = 0;
					state.last_ts = time::monotonic();

					// Simulated time from packet offsets, real elapsed time
					// from the monotonic clock.
					let simulated = pkt_ts.sub(state.mod_ts);
					let real = state.last_ts.sub(state.first_ts);

					log::debug!(
						"simulated time: {}.{:09}s; real time: {}.{:09}s",
						simulated.sec,
						simulated.nsec,
						real.sec,
						real.nsec
					);

					if !simulated.sub(real).is_negative() {
						time::sleep_for(simulated.sub(real));
					} else {
						let behind = real.sub(simulated);
						if behind.as_nanos() as u64 >= drift {
							log::error!(
								"aborting, real time drifted ahead of simulated time ({}.{:09}s) by {}.{:09}s",
								simulated.sec,
								simulated.nsec,
								behind.sec,
								behind.nsec
							);
							return Err(());
						}
					}
				}
			}
		}

		Ok(())
	}

	fn gap_sleep(state: &mut State, pkt_ts: Timespec, gap: Timespec) {
		if !gap.is_negative() {
			time::sleep_until(state.last_ts.add(gap));
		}
		state.last_pkt_ts = pkt_ts;
		state.last_ts = time::monotonic();
	}
}
