//! Platform-specific process control for the worker.

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use unix::{prepare_command, process_alive, request_stop, terminate_group};

#[cfg(not(unix))]
mod fallback {
    use std::io;
    use tokio::process::Command;

    pub fn prepare_command(_cmd: &mut Command) -> io::Result<()> {
        Ok(())
    }

    /// No portable graceful signal; closing stdin is the stop request.
    pub fn request_stop(_pid: u32) -> io::Result<()> {
        Ok(())
    }

    /// Forced termination goes through `Child::kill` on these platforms.
    pub fn terminate_group(_pid: u32) -> io::Result<()> {
        Ok(())
    }

    pub fn process_alive(_pid: u32) -> bool {
        false
    }
}

#[cfg(not(unix))]
pub use fallback::{prepare_command, process_alive, request_stop, terminate_group};
