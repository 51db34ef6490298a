use std::f32::consts::PI;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::{error, info};

use nicelights::{config, LightColor, LightOutput, MultiHostSender, SingleHostSender};

#[derive(Parser)]
#[clap(about = "Streams a test pattern to E1.31 lighting controllers.")]
struct Cli {
    /// YAML or JSON configuration file.
    #[clap(long, default_value = "./nicelights.yaml")]
    config: String,
    /// Animation ticks per second.
    #[clap(long, default_value_t = 60)]
    fps: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    nicelights::init_logging();
    let cli = Cli::parse();
    let config_root = config::read_config(&cli.config)?;

    let mut sender = SingleHostSender::from_config(&config_root);
    let mut multi = MultiHostSender::from_config(&config_root);
    if let Some(path) = &config_root.multi_sender.ranges_file {
        multi.read_ranges_file(path)?;
    }

    if config_root.sender.enabled {
        sender.set_enabled(true)?;
    }
    if config_root.multi_sender.enabled {
        // Hosts that fail to resolve are already logged; keep the others going.
        if let Err(err) = multi.set_enabled(true) {
            error!("Some hosts are unavailable: {}", err);
        }
    }
    if !sender.is_enabled() && !multi.is_enabled() {
        info!("No output enabled in {}", cli.config);
        return Ok(());
    }

    let mut frame = vec![LightColor::BLACK; config_root.led_count];
    let tick = Duration::from_secs(1) / cli.fps.max(1);
    let started = Instant::now();
    loop {
        let t = started.elapsed().as_secs_f32();
        for (index, light) in frame.iter_mut().enumerate() {
            let phase = t + index as f32 * 0.05 + multi.which_side(index) as f32 * PI;
            *light = LightColor::new(
                phase.sin() * 0.5 + 0.5,
                (phase + 2.25).sin() * 0.5 + 0.5,
                (phase + 4.5).sin() * 0.5 + 0.5,
            );
        }

        sender.update(&frame);
        multi.update(&frame);
        std::thread::sleep(tick);
    }
}
