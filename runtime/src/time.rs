use std::time::SystemTime;

const N1E9: i64 = 1_000_000_000;

/// A signed second/nanosecond pair used for monotonic-clock arithmetic.
///
/// All public constructors and operations return normalised values with
/// `0 <= nsec < 10^9` (for negative durations the seconds go negative and the
/// nanoseconds stay in range, mirroring `struct timespec` conventions).
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Timespec {
	pub sec: i64,
	pub nsec: i64,
}

impl Timespec {
	pub fn new(sec: i64, nsec: i64) -> Self {
		Self { sec, nsec }.normalised()
	}

	pub fn from_nanos(ns: u64) -> Self {
		Self {
			sec: (ns / N1E9 as u64) as i64,
			nsec: (ns % N1E9 as u64) as i64,
		}
	}

	pub fn normalised(mut self) -> Self {
		if self.nsec >= N1E9 {
			self.sec += self.nsec / N1E9;
			self.nsec %= N1E9;
		} else if self.nsec < 0 {
			let borrow = (-self.nsec + N1E9 - 1) / N1E9;
			self.sec -= borrow;
			self.nsec += borrow * N1E9;
		}
		self
	}

	pub fn add(self, other: Self) -> Self {
		Self {
			sec: self.sec + other.sec,
			nsec: self.nsec + other.nsec,
		}
		.normalised()
	}

	pub fn sub(self, other: Self) -> Self {
		Self {
			sec: self.sec - other.sec,
			nsec: self.nsec - other.nsec,
		}
		.normalised()
	}

	pub fn scale(self, by: f64) -> Self {
		Self {
			sec: (self.sec as f64 * by) as i64,
			nsec: (self.nsec as f64 * by) as i64,
		}
		.normalised()
	}

	pub fn is_negative(self) -> bool {
		self.sec < 0
	}

	pub fn as_nanos(self) -> i64 {
		self.sec * N1E9 + self.nsec
	}
}

/// The current monotonic clock reading.
#[cfg(unix)]
pub fn monotonic() -> Timespec {
	let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
	let ret = unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
	assert!(ret == 0, "clock_gettime(CLOCK_MONOTONIC) failed");
	Timespec { sec: ts.tv_sec as i64, nsec: ts.tv_nsec as i64 }
}

#[cfg(not(unix))]
pub fn monotonic() -> Timespec {
	use std::sync::OnceLock;
	use std::time::Instant;

	static START: OnceLock<Instant> = OnceLock::new();
	let elapsed = START.get_or_init(Instant::now).elapsed();
	Timespec {
		sec: elapsed.as_secs() as i64,
		nsec: elapsed.subsec_nanos() as i64,
	}
}

/// Sleep until an absolute monotonic-clock moment, resuming when a signal
/// wakes the thread early. Moments already in the past return immediately.
#[cfg(target_os = "linux")]
pub fn sleep_until(to: Timespec) {
	let to = libc::timespec {
		tv_sec: to.sec as libc::time_t,
		tv_nsec: to.nsec as _,
	};

	loop {
		let ret = unsafe { libc::clock_nanosleep(libc::CLOCK_MONOTONIC, libc::TIMER_ABSTIME, &to, core::ptr::null_mut()) };
		match ret {
			0 => return,
			libc::EINTR => continue,
			err => panic!("clock_nanosleep({}.{:09}) {}", to.tv_sec, to.tv_nsec, err),
		}
	}
}

#[cfg(not(target_os = "linux"))]
pub fn sleep_until(to: Timespec) {
	let diff = to.sub(monotonic());
	if !diff.is_negative() {
		std::thread::sleep(core::time::Duration::new(diff.sec as u64, diff.nsec as u32));
	}
}

/// Sleep for a relative duration. Negative durations return immediately.
pub fn sleep_for(diff: Timespec) {
	if diff.is_negative() {
		return;
	}
	sleep_until(monotonic().add(diff));
}

/// Milliseconds of wall-clock time since the UNIX epoch.
pub fn unix_ms() -> u64 {
	SystemTime::now()
		.duration_since(SystemTime::UNIX_EPOCH)
		.expect("current time is after the UNIX epoch")
		.as_millis() as u64
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn normalise() {
		let t = Timespec::new(1, 2_500_000_000);
		assert_eq!((t.sec, t.nsec), (3, 500_000_000));

		let t = Timespec::new(1, -1);
		assert_eq!((t.sec, t.nsec), (0, 999_999_999));
	}

	#[test]
	fn sub_borrows() {
		let a = Timespec::new(2, 100);
		let b = Timespec::new(1, 200);
		let d = a.sub(b);
		assert_eq!((d.sec, d.nsec), (0, 999_999_900));

		assert!(b.sub(a).is_negative());
	}

	#[test]
	fn monotonic_advances() {
		let a = monotonic();
		let b = monotonic();
		assert!(!b.sub(a).is_negative());
	}
}
