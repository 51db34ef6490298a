//! Sends the whole logical frame to a single destination.

use std::io;
use tracing::{error, info, warn};

use crate::color::{scale, LightColor};
use crate::config;
use crate::host::{DeviceRange, E131Client, LightOutput, UniverseSet};

/// Streams every LED, in order, as universes 1, 2, ... to one address.
pub struct SingleHostSender {
    /// Host name or IP address.
    destination: String,
    port: u16,
    /// Open while enabled.
    client: Option<E131Client>,
    universes: UniverseSet,
    /// Send one frame out of every `divisor`.
    divisor: u32,
    frame_count: u32,
    /// Operator limit on universes sent per frame.
    max_universe: Option<usize>,
    sequence: u8,
    /// Encode or send problems already logged.
    encode_reported: bool,
    send_reported: bool,
}

impl SingleHostSender {
    pub fn from_config(config: &config::Root) -> SingleHostSender {
        let sender = &config.sender;
        SingleHostSender {
            destination: sender.destination.clone(),
            port: sender.port,
            client: None,
            universes: UniverseSet::new(1, config.led_count),
            divisor: sender.divisor.max(1),
            frame_count: 0,
            max_universe: sender.max_universe.map(|max| max.max(1)),
            sequence: 0,
            encode_reported: false,
            send_reported: false,
        }
    }

    /// Size the universe buffers for `led_count` LEDs.
    pub fn init(&mut self, led_count: usize) {
        self.universes = UniverseSet::new(1, led_count);
        self.encode_reported = false;
        info!(
            "[sender] {} LEDs in {} universes",
            led_count,
            self.universes.len()
        );
    }

    pub fn num_universes(&self) -> usize {
        self.universes.len()
    }

    pub fn universes(&self) -> &UniverseSet {
        &self.universes
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Change the destination. Applies on the next enable.
    pub fn set_destination(&mut self, destination: &str, port: u16) {
        self.destination = destination.to_string();
        self.port = port;
    }

    pub fn divisor(&self) -> u32 {
        self.divisor
    }

    /// Change the divisor and start counting from zero again.
    pub fn set_divisor(&mut self, divisor: u32) {
        self.divisor = divisor.max(1);
        self.frame_count = 0;
    }

    /// Universes actually sent per frame.
    pub fn max_universe(&self) -> usize {
        let count = self.universes.len();
        self.max_universe.map_or(count, |max| max.min(count))
    }

    /// Limit output to the first `max` universes, at least one; `None` sends
    /// them all.
    pub fn set_max_universe(&mut self, max: Option<usize>) {
        self.max_universe = max.map(|max| max.max(1));
    }

    fn send_frame(&mut self, frame: &[LightColor]) {
        let range = DeviceRange {
            src_start: 0,
            src_end: frame.len(),
            dest_offset: 0,
            reversed: false,
        };
        if let Err(err) = self.universes.write_range(&range, frame, 0, scale) {
            if !self.encode_reported {
                warn!("[sender] {}", err);
                self.encode_reported = true;
            }
        }

        let client = match &self.client {
            Some(client) => client,
            None => return,
        };
        let max_universe = self.max_universe.unwrap_or(usize::MAX);
        for universe in self.universes.iter_mut().take(max_universe) {
            universe.sequence = self.sequence;
            self.sequence = self.sequence.wrapping_add(1);
            match client.send(universe) {
                Ok(_) => self.send_reported = false,
                Err(err) => {
                    if !self.send_reported {
                        warn!("[sender] E1.31 sending failed: {}", err);
                        self.send_reported = true;
                    }
                }
            }
        }
    }
}

impl LightOutput for SingleHostSender {
    fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    fn set_enabled(&mut self, enabled: bool) -> io::Result<()> {
        info!(
            "[sender] {} E1.31 sender",
            if enabled { "Enabling" } else { "Disabling" }
        );
        self.client = None;
        if !enabled {
            return Ok(());
        }
        let client = E131Client::new(&self.destination, self.port).map_err(|err| {
            error!(
                "[sender] Failed to set E1.31 destination {}:{}: {}",
                self.destination, self.port, err
            );
            err
        })?;
        self.client = Some(client);
        self.frame_count = 0;
        Ok(())
    }

    fn update(&mut self, frame: &[LightColor]) {
        if self.client.is_none() {
            return;
        }
        self.frame_count += 1;
        if self.frame_count >= self.divisor {
            self.send_frame(frame);
            self.frame_count = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{UniversePacket, CAPACITY};
    use std::net::UdpSocket;
    use std::time::Duration;

    fn listener() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        socket
    }

    fn sender_for(socket: &UdpSocket, led_count: usize) -> SingleHostSender {
        let mut config = config::Root::default();
        config.led_count = led_count;
        config.sender.port = socket.local_addr().unwrap().port();
        SingleHostSender::from_config(&config)
    }

    fn pending(socket: &UdpSocket) -> usize {
        socket.set_nonblocking(true).unwrap();
        let mut buf = [0u8; 1024];
        let mut count = 0;
        while socket.recv(&mut buf).is_ok() {
            count += 1;
        }
        socket.set_nonblocking(false).unwrap();
        count
    }

    fn recv(socket: &UdpSocket) -> (u16, u8, Vec<u8>) {
        let mut buf = [0u8; 1024];
        let len = socket.recv(&mut buf).unwrap();
        let packet = UniversePacket::read_from(&buf[..len]).unwrap();
        (packet.universe, packet.sequence, packet.data.to_vec())
    }

    #[test]
    fn disabled_does_nothing() {
        let socket = listener();
        let mut sender = sender_for(&socket, 10);
        let frame = vec![LightColor::new(1.0, 1.0, 1.0); 10];
        for _ in 0..5 {
            sender.update(&frame);
        }
        assert!(!sender.is_enabled());
        assert_eq!(sender.universes().read_led(0, 0), Ok([0, 0, 0]));
    }

    #[test]
    fn divisor_three() {
        let socket = listener();
        let mut sender = sender_for(&socket, 10);
        sender.set_enabled(true).unwrap();
        let frame = vec![LightColor::new(0.5, 0.0, 1.0); 10];

        sender.update(&frame);
        sender.update(&frame);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(pending(&socket), 0);

        sender.update(&frame);
        let (universe, sequence, data) = recv(&socket);
        assert_eq!((universe, sequence), (1, 0));
        assert_eq!(data.len(), 31);
        assert_eq!(&data[0..3], &[127, 0, 255]);

        // The counter was reset.
        sender.update(&frame);
        sender.update(&frame);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(pending(&socket), 0);
        sender.update(&frame);
        assert_eq!(recv(&socket).1, 1);
    }

    #[test]
    fn splits_across_universes() {
        let socket = listener();
        let mut sender = sender_for(&socket, 200);
        sender.set_divisor(1);
        sender.set_enabled(true).unwrap();
        assert_eq!(sender.num_universes(), 2);

        let mut frame = vec![LightColor::BLACK; 200];
        frame[169] = LightColor::new(1.0, 0.0, 0.0);
        frame[170] = LightColor::new(0.0, 1.0, 0.0);
        frame[199] = LightColor::new(0.0, 0.0, 1.0);
        sender.update(&frame);

        let (universe, sequence, data) = recv(&socket);
        assert_eq!((universe, sequence), (1, 0));
        assert_eq!(data.len(), CAPACITY * 3 + 1);
        assert_eq!(&data[169 * 3..169 * 3 + 3], &[255, 0, 0]);

        let (universe, sequence, data) = recv(&socket);
        assert_eq!((universe, sequence), (2, 1));
        assert_eq!(data.len(), 30 * 3 + 1);
        assert_eq!(&data[0..3], &[0, 255, 0]);
        assert_eq!(&data[29 * 3..29 * 3 + 3], &[0, 0, 255]);
    }

    #[test]
    fn max_universe_ceiling() {
        let socket = listener();
        let mut sender = sender_for(&socket, 400);
        sender.set_divisor(1);
        sender.set_max_universe(Some(2));
        sender.set_enabled(true).unwrap();
        assert_eq!(sender.num_universes(), 3);
        assert_eq!(sender.max_universe(), 2);

        sender.update(&vec![LightColor::BLACK; 400]);
        assert_eq!(recv(&socket).0, 1);
        assert_eq!(recv(&socket).0, 2);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(pending(&socket), 0);

        sender.set_max_universe(Some(10));
        assert_eq!(sender.max_universe(), 3);

        sender.set_max_universe(Some(0));
        assert_eq!(sender.max_universe(), 1);
        sender.update(&vec![LightColor::BLACK; 400]);
        assert_eq!(recv(&socket).0, 1);
    }

    #[test]
    fn longer_frame_is_cut() {
        let socket = listener();
        let mut sender = sender_for(&socket, 10);
        sender.set_divisor(1);
        sender.set_enabled(true).unwrap();
        // Only the first universe exists; LEDs past it are dropped.
        sender.update(&vec![LightColor::new(1.0, 1.0, 1.0); 300]);
        let (universe, _, data) = recv(&socket);
        assert_eq!(universe, 1);
        assert_eq!(data.len(), 31);
    }

    #[test]
    fn reinit_resizes() {
        let socket = listener();
        let mut sender = sender_for(&socket, 10);
        sender.init(CAPACITY);
        assert_eq!(sender.num_universes(), 2);
        assert_eq!(sender.universes().get(1).unwrap().led_count(), 0);
    }
}
