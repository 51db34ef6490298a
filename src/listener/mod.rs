//! Accepts E1.31 universes from the network and rebuilds frames from them.

use std::io;
use std::net::SocketAddr;
use tracing::{debug, error, info, warn};

use crate::color::LightColor;
use crate::config;
use crate::protocol::{is_out_of_order, num_universes, UniversePacket, CAPACITY};

mod udp;
pub use self::udp::UdpListener;

/// Reassembly buffer for one frame's worth of universes.
#[derive(Debug, Clone)]
pub struct ReceiveState {
    /// Raw bytes, `CAPACITY * 3` per universe.
    frame_buffer: Vec<u8>,
    /// `received[i]` is set once universe `i + 1` arrived since the last release.
    received: Vec<bool>,
    last_seq: u8,
    num_universes: usize,
}

impl ReceiveState {
    pub fn new(led_count: usize) -> ReceiveState {
        let num_universes = num_universes(led_count);
        info!(
            "[receiver] Num universes: {}, LEDs per universe: {}",
            num_universes, CAPACITY
        );
        ReceiveState {
            frame_buffer: vec![0; num_universes * CAPACITY * 3],
            received: vec![false; num_universes],
            last_seq: 0,
            num_universes,
        }
    }

    pub fn num_universes(&self) -> usize {
        self.num_universes
    }

    pub fn last_seq(&self) -> u8 {
        self.last_seq
    }

    /// Whether every expected universe arrived since the last release.
    pub fn is_complete(&self) -> bool {
        self.received.iter().all(|received| *received)
    }

    /// Whether universe `number` arrived since the last release.
    pub fn has_universe(&self, number: u16) -> bool {
        (number as usize)
            .checked_sub(1)
            .and_then(|index| self.received.get(index).copied())
            .unwrap_or(false)
    }

    /// Store one validated packet.
    ///
    /// The sequence check only warns: reordered universes are still stored.
    /// Returns false for universes this receiver does not expect.
    pub fn handle_packet(&mut self, packet: &UniversePacket) -> bool {
        if is_out_of_order(packet.sequence, self.last_seq, packet.options) {
            warn!(
                "[receiver] Packet out of order: sequence {} after {}",
                packet.sequence, self.last_seq
            );
        }
        self.last_seq = packet.sequence;

        let universe = packet.universe as usize;
        if universe == 0 || universe > self.num_universes {
            debug!("[receiver] Ignoring universe {}", universe);
            return false;
        }
        let index = universe - 1;

        // The spare trailing byte must not spill into the next universe.
        let data = &packet.data[..packet.data.len().min(CAPACITY * 3)];
        let start = index * CAPACITY * 3;
        let end = start + data.len();
        if self.frame_buffer.len() < end {
            self.frame_buffer.resize(end, 0);
        }
        self.frame_buffer[start..end].copy_from_slice(data);
        self.received[index] = true;
        true
    }

    /// Copy the buffer into `frame` if it may be released, and start over.
    ///
    /// With `dont_wait` set the buffer is released every time, otherwise only
    /// once all universes are in. Returns whether `frame` was written.
    pub fn sync(&mut self, frame: &mut [LightColor], dont_wait: bool) -> bool {
        if !dont_wait && !self.is_complete() {
            return false;
        }
        for received in self.received.iter_mut() {
            *received = false;
        }
        for (light, rgb) in frame.iter_mut().zip(self.frame_buffer.chunks_exact(3)) {
            *light = LightColor::from_bytes(rgb[0], rgb[1], rgb[2]);
        }
        true
    }
}

/// Listens for universes and hands complete frames to the caller.
pub struct FrameReceiver {
    bind_addr: String,
    listener: Option<UdpListener>,
    state: ReceiveState,
    /// Release partial frames instead of waiting for every universe.
    pub dont_wait: bool,
}

impl FrameReceiver {
    pub fn from_config(config: &config::Root) -> FrameReceiver {
        FrameReceiver {
            bind_addr: config.receiver.bind_addr.clone(),
            listener: None,
            state: ReceiveState::new(config.led_count),
            dont_wait: config.receiver.dont_wait,
        }
    }

    /// Size the reassembly buffer for `led_count` LEDs.
    pub fn init(&mut self, led_count: usize) {
        self.state = ReceiveState::new(led_count);
    }

    pub fn state(&self) -> &ReceiveState {
        &self.state
    }

    pub fn is_enabled(&self) -> bool {
        self.listener.is_some()
    }

    /// Bound address while enabled.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Change the listening address. Applies on the next enable.
    pub fn set_bind_addr(&mut self, addr: &str) {
        self.bind_addr = addr.to_string();
    }

    /// Bind or unbind the socket. A failed bind leaves the receiver disabled.
    pub fn set_enabled(&mut self, enabled: bool) -> io::Result<()> {
        self.listener = None;
        if !enabled {
            info!("[receiver] E1.31 receiver disabled");
            return Ok(());
        }
        let listener = UdpListener::bind(&self.bind_addr).map_err(|err| {
            error!("[receiver] Failed to bind to {}: {}", self.bind_addr, err);
            err
        })?;
        self.listener = Some(listener);
        info!("[receiver] E1.31 receiver enabled");
        Ok(())
    }

    /// Drain every queued packet, then release a frame into `frame` if one
    /// is ready. Never blocks. Returns whether `frame` was written.
    pub fn update(&mut self, frame: &mut [LightColor]) -> bool {
        let listener = match self.listener.as_mut() {
            Some(listener) => listener,
            None => return false,
        };

        loop {
            match listener.poll() {
                Ok(Some((data, source))) => match UniversePacket::read_from(data) {
                    Ok(packet) => {
                        self.state.handle_packet(&packet);
                    }
                    Err(err) => {
                        warn!("[receiver] Invalid E1.31 packet from {}: {}", source, err);
                    }
                },
                Ok(None) => break,
                Err(err) => {
                    warn!("[receiver] Receive failed: {}", err);
                    break;
                }
            }
        }

        self.state.sync(frame, self.dont_wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Universe;

    fn packet_bytes(number: u16, sequence: u8, leds: &[[u8; 3]]) -> Vec<u8> {
        let mut universe = Universe::new(number, leds.len());
        universe.sequence = sequence;
        for (n, rgb) in leds.iter().enumerate() {
            universe.data_mut()[n * 3..n * 3 + 3].copy_from_slice(rgb);
        }
        let mut buf = vec![];
        universe.write_to(&[0; 16], &mut buf).unwrap();
        buf
    }

    fn feed(state: &mut ReceiveState, number: u16, sequence: u8, leds: &[[u8; 3]]) -> bool {
        let buf = packet_bytes(number, sequence, leds);
        let packet = UniversePacket::read_from(&buf).unwrap();
        state.handle_packet(&packet)
    }

    #[test]
    fn waits_for_all_universes() {
        let mut state = ReceiveState::new(200);
        assert_eq!(state.num_universes(), 2);
        let mut frame = vec![LightColor::BLACK; 200];

        assert!(feed(&mut state, 1, 0, &[[255, 0, 0]; 170]));
        assert!(!state.sync(&mut frame, false));
        assert_eq!(frame[0], LightColor::BLACK);

        assert!(feed(&mut state, 2, 1, &[[0, 0, 255]; 30]));
        assert!(state.is_complete());
        assert!(state.sync(&mut frame, false));
        assert_eq!(frame[0], LightColor::new(1.0, 0.0, 0.0));
        assert_eq!(frame[169], LightColor::new(1.0, 0.0, 0.0));
        assert_eq!(frame[170], LightColor::new(0.0, 0.0, 1.0));
        assert_eq!(frame[199], LightColor::new(0.0, 0.0, 1.0));

        // The mask starts over after a release.
        assert!(!state.has_universe(1));
        assert!(!state.sync(&mut frame, false));
    }

    #[test]
    fn dont_wait_releases_partial_frames() {
        let mut state = ReceiveState::new(200);
        let mut frame = vec![LightColor::BLACK; 200];

        feed(&mut state, 1, 0, &[[255, 0, 0]; 170]);
        feed(&mut state, 2, 1, &[[0, 255, 0]; 30]);
        assert!(state.sync(&mut frame, true));

        // Only universe 2 changes; universe 1 keeps what arrived before.
        feed(&mut state, 2, 2, &[[0, 0, 255]; 30]);
        assert!(state.sync(&mut frame, true));
        assert_eq!(frame[170], LightColor::new(0.0, 0.0, 1.0));
        assert_eq!(frame[0], LightColor::new(1.0, 0.0, 0.0));

        // Nothing new at all still releases.
        assert!(state.sync(&mut frame, true));
    }

    #[test]
    fn late_first_universe_keeps_second() {
        let mut state = ReceiveState::new(200);
        let mut frame = vec![LightColor::BLACK; 200];
        feed(&mut state, 2, 0, &[[10, 20, 30]; 30]);
        feed(&mut state, 1, 1, &[[0, 0, 0]; 170]);
        assert!(state.sync(&mut frame, false));
        assert_eq!(frame[170], LightColor::from_bytes(10, 20, 30));
    }

    #[test]
    fn ignores_unexpected_universes() {
        let mut state = ReceiveState::new(10);
        assert!(!feed(&mut state, 0, 0, &[[1, 2, 3]]));
        assert!(!feed(&mut state, 2, 1, &[[1, 2, 3]]));
        assert!(!state.is_complete());
        assert!(feed(&mut state, 1, 2, &[[1, 2, 3]]));
        assert!(state.is_complete());
    }

    #[test]
    fn out_of_order_is_still_stored() {
        let mut state = ReceiveState::new(400);
        feed(&mut state, 1, 10, &[[9, 9, 9]]);
        assert!(feed(&mut state, 2, 5, &[[8, 8, 8]]));
        assert_eq!(state.last_seq(), 5);
        assert!(state.has_universe(2));
        // Duplicates are accepted too.
        assert!(feed(&mut state, 2, 5, &[[7, 7, 7]]));
    }

    #[test]
    fn buffer_covers_every_universe() {
        let mut state = ReceiveState::new(200);
        assert_eq!(state.frame_buffer.len(), 2 * CAPACITY * 3);

        // A longer frame is refreshed up to the end of the last universe.
        let mut frame = vec![LightColor::new(0.5, 0.5, 0.5); 340];
        feed(&mut state, 2, 0, &[[255, 255, 255]; 30]);
        assert!(state.sync(&mut frame, true));
        assert_eq!(frame[0], LightColor::BLACK);
        assert_eq!(frame[199], LightColor::new(1.0, 1.0, 1.0));
        assert_eq!(frame[250], LightColor::BLACK);
        assert_eq!(frame[339], LightColor::BLACK);
    }

    #[test]
    fn oversized_universe_fills_frame() {
        let mut state = ReceiveState::new(4);
        let mut frame = vec![LightColor::BLACK; 10];
        feed(&mut state, 1, 0, &[[255, 0, 0]; 10]);
        assert!(state.sync(&mut frame, false));
        assert_eq!(frame[9], LightColor::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn disabled_receiver_is_inert() {
        let mut receiver = FrameReceiver::from_config(&config::Root::default());
        let mut frame = vec![LightColor::new(0.5, 0.5, 0.5); 4];
        assert!(!receiver.update(&mut frame));
        assert!(!receiver.is_enabled());
        assert!(receiver.local_addr().is_none());
        assert_eq!(frame[0], LightColor::new(0.5, 0.5, 0.5));
    }

    #[test]
    fn bind_failure_stays_disabled() {
        let mut receiver = FrameReceiver::from_config(&config::Root::default());
        receiver.set_bind_addr("not an address");
        assert!(receiver.set_enabled(true).is_err());
        assert!(!receiver.is_enabled());
    }
}
