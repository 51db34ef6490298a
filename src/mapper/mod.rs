//! The Mapper sends a logical frame to every host of a range map.

use std::io;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::color::{Gamma, LightColor};
use crate::config::{self, MAX_PACKET_OFFSET};
use crate::host::{E131Client, LightOutput, UniverseSet};

pub mod parser;
pub use parser::{read_ranges_file, HostTarget, RangeMap, RangeMapError};

/// A configured host and everything needed to feed it.
struct HostOutput {
    target: HostTarget,
    /// Universe buffers, reused every frame.
    universes: UniverseSet,
    /// Open while the mapper is enabled and the host resolved.
    client: Option<E131Client>,
    /// Sequence number for the next universe sent to this host.
    sequence: u8,
    /// Ranges that already logged a problem.
    range_reported: Vec<bool>,
    /// Whether the last send failure has been logged.
    send_reported: bool,
}

impl HostOutput {
    fn new(target: HostTarget) -> HostOutput {
        let universes = UniverseSet::new(target.start_universe, target.data_extent);
        info!(
            "[multi] Host {} gets universes {}..{}",
            target.name,
            target.start_universe,
            target.start_universe as usize + universes.len()
        );
        HostOutput {
            range_reported: vec![false; target.ranges.len()],
            target,
            universes,
            client: None,
            sequence: 0,
            send_reported: false,
        }
    }
}

/// Result type for various Mapper actions.
pub type MapperResult<T> = Result<T, MapperError>;

/// Various runtime errors for the Mapper.
#[derive(Debug, Error)]
pub enum MapperError {
    /// The range map file could not be read.
    #[error("unable to read range map: {0}")]
    IoError(#[from] io::Error),
    /// Packet offsets larger than the protocol slack are refused.
    #[error("packet offset {0} is larger than {max}", max = MAX_PACKET_OFFSET)]
    InvalidOffset(usize),
}

/// Sends range-mapped universes to any number of hosts.
pub struct MultiHostSender {
    hosts: Vec<HostOutput>,
    enabled: bool,
    /// Send one frame out of every `divisor`, shared by all hosts.
    divisor: u32,
    frame_count: u32,
    /// Bytes skipped at the start of each universe payload.
    start_offset: usize,
    gamma: Gamma,
    port: u16,
    leds_per_edge: usize,
}

impl Default for MultiHostSender {
    fn default() -> MultiHostSender {
        MultiHostSender::from_config(&config::Root::default())
    }
}

impl MultiHostSender {
    /// Set up a sender with no hosts from the configuration.
    ///
    /// The range map is loaded separately with [`MultiHostSender::read_ranges_file`].
    pub fn from_config(config: &config::Root) -> MultiHostSender {
        let multi = &config.multi_sender;
        MultiHostSender {
            hosts: vec![],
            enabled: false,
            divisor: multi.divisor.max(1),
            frame_count: 0,
            start_offset: multi.packet_offset.min(MAX_PACKET_OFFSET),
            gamma: Gamma(multi.gamma),
            port: multi.port,
            leds_per_edge: config.leds_per_edge.max(1),
        }
    }

    /// Drop every host and load a new range map from disk.
    ///
    /// The sender is disabled first and stays disabled.
    pub fn read_ranges_file<T: AsRef<Path>>(&mut self, path: T) -> MapperResult<()> {
        self.disable();
        self.hosts.clear();
        let map = read_ranges_file(path.as_ref()).map_err(|err| {
            error!("[multi] Failed to open {}: {}", path.as_ref().display(), err);
            err
        })?;
        self.load_ranges(map);
        Ok(())
    }

    /// Replace all hosts with the ones from `map`. Disables the sender.
    pub fn load_ranges(&mut self, map: RangeMap) {
        self.disable();
        self.hosts = map.hosts.into_iter().map(HostOutput::new).collect();
    }

    /// Configured hosts.
    pub fn hosts(&self) -> impl Iterator<Item = &HostTarget> {
        self.hosts.iter().map(|host| &host.target)
    }

    /// Universe buffers of the host declared as `name`.
    pub fn universes(&self, name: &str) -> Option<&UniverseSet> {
        self.hosts
            .iter()
            .find(|host| host.target.name == name)
            .map(|host| &host.universes)
    }

    pub fn divisor(&self) -> u32 {
        self.divisor
    }

    pub fn set_divisor(&mut self, divisor: u32) {
        self.divisor = divisor.max(1);
        self.frame_count = 0;
    }

    pub fn start_offset(&self) -> usize {
        self.start_offset
    }

    pub fn set_start_offset(&mut self, offset: usize) -> MapperResult<()> {
        if offset > MAX_PACKET_OFFSET {
            return Err(MapperError::InvalidOffset(offset));
        }
        self.start_offset = offset;
        Ok(())
    }

    /// Port the hosts are addressed at.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address hosts at a port other than
    /// [`crate::protocol::DEFAULT_PORT`]. Applies on the
    /// next enable.
    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    pub fn gamma(&self) -> Gamma {
        self.gamma
    }

    pub fn set_gamma(&mut self, gamma: Gamma) {
        self.gamma = gamma;
    }

    /// Which side of its edge strip logical LED `index` faces.
    ///
    /// LEDs inside a reversed range are side 1, inside a forward range side 0.
    /// Anything unmapped alternates per edge.
    pub fn which_side(&self, index: usize) -> usize {
        self.hosts
            .iter()
            .flat_map(|host| host.target.ranges.iter())
            .find(|range| range.contains(index))
            .map(|range| range.reversed as usize)
            .unwrap_or((index / self.leds_per_edge) & 1)
    }

    fn disable(&mut self) {
        if self.enabled {
            info!("[multi] Disabling E1.31 multi sender");
        }
        self.enabled = false;
        for host in &mut self.hosts {
            host.client = None;
        }
    }

    /// Encode the frame into every host's universes and send them.
    fn send_frame(&mut self, frame: &[LightColor]) {
        let start_offset = self.start_offset;
        let gamma = self.gamma;

        for host in &mut self.hosts {
            let client = match &host.client {
                Some(client) => client,
                None => continue,
            };

            for (index, range) in host.target.ranges.iter().enumerate() {
                if let Err(err) = host.universes.write_range(range, frame, start_offset, |v| gamma.encode(v)) {
                    if !host.range_reported[index] {
                        warn!("[multi] Host {}: {}", host.target.name, err);
                        host.range_reported[index] = true;
                    }
                }
            }

            for universe in host.universes.iter_mut() {
                universe.sequence = host.sequence;
                host.sequence = host.sequence.wrapping_add(1);
                match client.send(universe) {
                    Ok(_) => host.send_reported = false,
                    Err(err) => {
                        if !host.send_reported {
                            warn!("[multi] E1.31 sending to {} failed: {}", host.target.name, err);
                            host.send_reported = true;
                        }
                    }
                }
            }
        }
    }
}

impl LightOutput for MultiHostSender {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Open one socket per host. Hosts that fail stay silent; the first
    /// failure is returned once every host has been tried.
    fn set_enabled(&mut self, enabled: bool) -> io::Result<()> {
        if !enabled {
            self.disable();
            return Ok(());
        }

        info!("[multi] Enabling E1.31 multi sender");
        let mut result = Ok(());
        for host in &mut self.hosts {
            let address = host.target.address();
            if address != host.target.name {
                debug!("[multi] Using {} for {}", address, host.target.name);
            }
            match E131Client::new(address, self.port) {
                Ok(client) => host.client = Some(client),
                Err(err) => {
                    error!("[multi] Failed to set up {}: {}", host.target.name, err);
                    host.client = None;
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
            }
        }
        self.enabled = true;
        self.frame_count = 0;
        result
    }

    fn update(&mut self, frame: &[LightColor]) {
        if !self.enabled {
            return;
        }
        self.frame_count += 1;
        if self.frame_count < self.divisor {
            return;
        }
        self.frame_count = 0;
        self.send_frame(frame);
    }
}
