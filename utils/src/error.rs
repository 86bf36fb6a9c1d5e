use core::result;

/// The crate-wide result type. Failures carry no payload; the site that
/// detects a failure is responsible for logging it with enough context.
pub type Result<T = (), E = ()> = result::Result<T, E>;

#[doc(hidden)]
pub trait Ext<T, E> {
	fn ok_or(self, f: impl FnOnce(E)) -> Option<T>;
}

impl<T, E> Ext<T, E> for result::Result<T, E> {
	fn ok_or(self, f: impl FnOnce(E)) -> Option<T> {
		match self {
			Ok(v) => Some(v),
			Err(e) => {
				f(e);
				None
			}
		}
	}
}

pub use Ext as _;
