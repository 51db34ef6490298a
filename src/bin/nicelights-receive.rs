use std::time::{Duration, Instant};

use clap::Parser;
use tracing::info;

use nicelights::{config, FrameReceiver, LightColor};

#[derive(Parser)]
#[clap(about = "Receives E1.31 universes and reports reassembled frames.")]
struct Cli {
    /// YAML or JSON configuration file.
    #[clap(long, default_value = "./nicelights.yaml")]
    config: String,
    /// Polls per second.
    #[clap(long, default_value_t = 60)]
    fps: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    nicelights::init_logging();
    let cli = Cli::parse();
    let config_root = config::read_config(&cli.config)?;

    let mut receiver = FrameReceiver::from_config(&config_root);
    receiver.set_enabled(true)?;

    let mut frame = vec![LightColor::BLACK; config_root.led_count];
    let tick = Duration::from_secs(1) / cli.fps.max(1);
    let mut released = 0u64;
    let mut last_report = Instant::now();
    loop {
        if receiver.update(&mut frame) {
            released += 1;
        }
        if last_report.elapsed() >= Duration::from_secs(1) {
            let lit = frame
                .iter()
                .filter(|light| light.r + light.g + light.b > 0.0)
                .count();
            info!(
                "{} frames released, {} of {} LEDs lit, last sequence {}",
                released,
                lit,
                frame.len(),
                receiver.state().last_seq()
            );
            last_report = Instant::now();
        }
        std::thread::sleep(tick);
    }
}
