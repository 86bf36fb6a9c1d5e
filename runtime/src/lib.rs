use std::sync::atomic::{AtomicBool, Ordering};

use utils::error::*;

mod logger;
pub mod time;

pub use logger::Logger;

static EXIT: AtomicBool = AtomicBool::new(false);

/// Install the Ctrl+C handler. The first signal flips the exit flag so that
/// ingest loops can drain gracefully; processing checks [`exit_requested`].
pub fn install_exit_handler() -> Result {
	ctrlc::set_handler(|| {
		if EXIT.swap(true, Ordering::Relaxed) {
			// Second signal: the user really means it.
			std::process::exit(1);
		}
	})
	.map_err(|err| log::error!("Error occurred while setting Ctrl+C handler: {err}"))
}

pub fn exit_requested() -> bool {
	EXIT.load(Ordering::Relaxed)
}

/// Request a graceful stop, as if Ctrl+C had been pressed.
pub fn request_exit() {
	EXIT.store(true, Ordering::Relaxed);
}
