//! Streams LED frames to lighting controllers over E1.31 and rebuilds
//! frames received the same way.

pub mod color;
pub mod config;
pub mod host;
pub mod listener;
pub mod mapper;
pub mod protocol;
pub mod sender;

pub use color::{Gamma, LightColor, LogicalFrame};
pub use host::LightOutput;
pub use listener::FrameReceiver;
pub use mapper::MultiHostSender;
pub use sender::SingleHostSender;

/// Install the `tracing` subscriber used by the binaries.
///
/// `RUST_LOG` overrides the default `info` level.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
