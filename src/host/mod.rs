//! Host devices receive frames and put them on the wire as universes.

use std::io;
use thiserror::Error;

use crate::color::LightColor;
use crate::protocol::{num_universes, Universe, CAPACITY};

pub mod udpclient;
pub use self::udpclient::E131Client;

/// Light outputs take one frame per animation tick and pass it on to devices.
pub trait LightOutput {
    /// Whether the output currently has its sockets open.
    fn is_enabled(&self) -> bool;
    /// Open or close the output's sockets.
    ///
    /// Failing to enable leaves the output disabled.
    fn set_enabled(&mut self, enabled: bool) -> io::Result<()>;
    /// Accept the current frame. Never blocks.
    fn update(&mut self, frame: &[LightColor]);
}

/// Maps logical LEDs `src_start..src_end` onto a window of destination
/// offsets starting at `dest_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceRange {
    pub src_start: usize,
    pub src_end: usize,
    pub dest_offset: usize,
    /// Walk the source back-to-front.
    pub reversed: bool,
}

impl DeviceRange {
    pub fn len(&self) -> usize {
        self.src_end.saturating_sub(self.src_start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One past the last destination offset written.
    pub fn dest_end(&self) -> usize {
        self.dest_offset.saturating_add(self.len())
    }

    /// `(source index, destination offset)` pairs in write order.
    ///
    /// The destination always ascends; the source descends for reversed ranges.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> {
        let DeviceRange {
            src_start,
            src_end,
            dest_offset,
            reversed,
        } = *self;
        (0..self.len()).map(move |step| {
            let src = if reversed {
                src_end - 1 - step
            } else {
                src_start + step
            };
            (src, dest_offset + step)
        })
    }

    /// Whether logical LED `index` is covered by this range.
    pub fn contains(&self, index: usize) -> bool {
        index >= self.src_start && index < self.src_end
    }
}

pub type EncodeResult<T> = Result<T, EncodeError>;

/// Writes that could not land in a universe buffer.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("offset {offset} needs universe {universe} but only {allocated} are allocated")]
    UniverseOutOfRange {
        offset: usize,
        universe: usize,
        allocated: usize,
    },
    #[error("offset {offset} lands at byte {byte} which is past the universe payload")]
    PayloadOutOfRange { offset: usize, byte: usize },
    #[error("range {start}..{end} is outside of the {len} LED frame")]
    SourceOutOfRange { start: usize, end: usize, len: usize },
}

/// The contiguous block of universes owned by one destination.
#[derive(Debug, Clone)]
pub struct UniverseSet {
    universes: Vec<Universe>,
}

impl UniverseSet {
    /// Allocate enough universes for `led_count` LEDs, numbered upward from
    /// `start_universe`.
    pub fn new(start_universe: u16, led_count: usize) -> UniverseSet {
        let count = num_universes(led_count);
        let mut remaining = led_count;
        let mut universes = Vec::with_capacity(count);
        for n in 0..count {
            let number = match u16::try_from(n).ok().and_then(|n| start_universe.checked_add(n)) {
                Some(number) => number,
                None => break,
            };
            let size = remaining.min(CAPACITY);
            universes.push(Universe::new(number, size));
            remaining -= size;
        }
        UniverseSet { universes }
    }

    pub fn len(&self) -> usize {
        self.universes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.universes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Universe> {
        self.universes.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Universe> {
        self.universes.iter_mut()
    }

    pub fn get(&self, index: usize) -> Option<&Universe> {
        self.universes.get(index)
    }

    /// Locate the three payload bytes of destination `offset`.
    fn locate(&self, offset: usize, start_offset: usize) -> EncodeResult<(usize, usize)> {
        let universe = offset / CAPACITY;
        if universe >= self.universes.len() {
            return Err(EncodeError::UniverseOutOfRange {
                offset,
                universe,
                allocated: self.universes.len(),
            });
        }
        let byte = start_offset + (offset % CAPACITY) * 3;
        if byte + 3 > self.universes[universe].data().len() {
            return Err(EncodeError::PayloadOutOfRange { offset, byte });
        }
        Ok((universe, byte))
    }

    /// Write one LED at destination `offset`, `start_offset` bytes into the
    /// payload.
    pub fn write_led<F: Fn(f32) -> u8>(
        &mut self,
        offset: usize,
        color: &LightColor,
        start_offset: usize,
        encode: F,
    ) -> EncodeResult<()> {
        let (universe, byte) = self.locate(offset, start_offset)?;
        self.universes[universe].data_mut()[byte..byte + 3].copy_from_slice(&color.to_bytes(encode));
        Ok(())
    }

    /// Read back the bytes stored for destination `offset`.
    pub fn read_led(&self, offset: usize, start_offset: usize) -> EncodeResult<[u8; 3]> {
        let (universe, byte) = self.locate(offset, start_offset)?;
        let data = self.universes[universe].data();
        Ok([data[byte], data[byte + 1], data[byte + 2]])
    }

    /// Write every LED of `range` from `frame`.
    ///
    /// Individual failing writes are skipped; the first failure is returned
    /// after the rest of the range has been written.
    pub fn write_range<F: Fn(f32) -> u8>(
        &mut self,
        range: &DeviceRange,
        frame: &[LightColor],
        start_offset: usize,
        encode: F,
    ) -> EncodeResult<()> {
        if range.src_end > frame.len() {
            return Err(EncodeError::SourceOutOfRange {
                start: range.src_start,
                end: range.src_end,
                len: frame.len(),
            });
        }
        let mut result = Ok(());
        for (src, dest) in range.pairs() {
            if let Err(err) = self.write_led(dest, &frame[src], start_offset, &encode) {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{scale, Gamma};

    fn ramp(len: usize) -> Vec<LightColor> {
        (0..len)
            .map(|n| LightColor::from_bytes(n as u8, (n / 2) as u8, 255 - n as u8))
            .collect()
    }

    #[test]
    fn allocation_sizes() {
        let set = UniverseSet::new(1, 200);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(0).unwrap().number, 1);
        assert_eq!(set.get(0).unwrap().led_count(), 170);
        assert_eq!(set.get(1).unwrap().number, 2);
        assert_eq!(set.get(1).unwrap().led_count(), 30);

        // The trailing universe on exact multiples is empty.
        let set = UniverseSet::new(10, 340);
        assert_eq!(set.len(), 3);
        assert_eq!(set.get(2).unwrap().number, 12);
        assert_eq!(set.get(2).unwrap().led_count(), 0);
    }

    #[test]
    fn numbering_stops_at_last_universe() {
        let set = UniverseSet::new(65534, 600);
        let numbers: Vec<_> = set.iter().map(|universe| universe.number).collect();
        assert_eq!(numbers, vec![65534, 65535]);
    }

    #[test]
    fn forward_range_pairs() {
        let range = DeviceRange {
            src_start: 5,
            src_end: 9,
            dest_offset: 100,
            reversed: false,
        };
        let pairs: Vec<_> = range.pairs().collect();
        assert_eq!(pairs, vec![(5, 100), (6, 101), (7, 102), (8, 103)]);
    }

    #[test]
    fn reversed_range_mirrors_forward() {
        let forward = DeviceRange {
            src_start: 10,
            src_end: 20,
            dest_offset: 10,
            reversed: false,
        };
        let reversed = DeviceRange {
            reversed: true,
            ..forward
        };
        let fwd: Vec<_> = forward.pairs().collect();
        let rev: Vec<_> = reversed.pairs().collect();
        assert_eq!(rev.len(), 10);
        assert_eq!(rev.first(), Some(&(19, 10)));
        assert_eq!(rev.last(), Some(&(10, 19)));
        for window in rev.windows(2) {
            assert!(window[1].1 > window[0].1);
            assert!(window[1].0 < window[0].0);
        }
        // Same destinations, sources mirrored around the range centre.
        for ((fs, fd), (rs, rd)) in fwd.iter().zip(rev.iter()) {
            assert_eq!(fd, rd);
            assert_eq!(*fs + *rs, 10 + 19);
        }
    }

    #[test]
    fn empty_range_writes_nothing() {
        let range = DeviceRange {
            src_start: 4,
            src_end: 4,
            dest_offset: 0,
            reversed: true,
        };
        assert!(range.is_empty());
        assert_eq!(range.pairs().count(), 0);
    }

    #[test]
    fn write_led_crosses_universes() {
        let mut set = UniverseSet::new(1, 200);
        let color = LightColor::new(1.0, 0.5, 0.0);
        set.write_led(170, &color, 0, scale).unwrap();
        assert_eq!(&set.get(1).unwrap().data()[0..3], &[255, 127, 0]);
        assert_eq!(set.read_led(170, 0), Ok([255, 127, 0]));

        set.write_led(169, &color, 1, scale).unwrap();
        let start = 1 + 169 * 3;
        assert_eq!(&set.get(0).unwrap().data()[start..start + 3], &[255, 127, 0]);
    }

    #[test]
    fn write_led_out_of_bounds() {
        let mut set = UniverseSet::new(1, 10);
        let color = LightColor::BLACK;
        assert_eq!(
            set.write_led(170, &color, 0, scale),
            Err(EncodeError::UniverseOutOfRange {
                offset: 170,
                universe: 1,
                allocated: 1
            })
        );
        // The last slot plus a large header offset runs off the payload.
        assert_eq!(
            set.write_led(169, &color, 4, scale),
            Err(EncodeError::PayloadOutOfRange {
                offset: 169,
                byte: 4 + 169 * 3
            })
        );
    }

    #[test]
    fn write_range_reversed() {
        let frame = ramp(20);
        let mut set = UniverseSet::new(1, 20);
        let range = DeviceRange {
            src_start: 10,
            src_end: 20,
            dest_offset: 0,
            reversed: true,
        };
        set.write_range(&range, &frame, 0, scale).unwrap();
        assert_eq!(set.read_led(0, 0), Ok(frame[19].to_bytes(scale)));
        assert_eq!(set.read_led(9, 0), Ok(frame[10].to_bytes(scale)));
    }

    #[test]
    fn write_range_with_gamma() {
        let frame = vec![LightColor::new(0.5, 0.0, 1.0); 4];
        let mut set = UniverseSet::new(1, 4);
        let gamma = Gamma::default();
        let range = DeviceRange {
            src_start: 0,
            src_end: 4,
            dest_offset: 0,
            reversed: false,
        };
        set.write_range(&range, &frame, 1, |v| gamma.encode(v)).unwrap();
        assert_eq!(set.read_led(3, 1), Ok([186, 0, 255]));
        // Start code slot untouched.
        assert_eq!(set.get(0).unwrap().data()[0], 0);
    }

    #[test]
    fn write_range_past_frame() {
        let frame = ramp(5);
        let mut set = UniverseSet::new(1, 10);
        let range = DeviceRange {
            src_start: 0,
            src_end: 10,
            dest_offset: 0,
            reversed: false,
        };
        assert_eq!(
            set.write_range(&range, &frame, 0, scale),
            Err(EncodeError::SourceOutOfRange {
                start: 0,
                end: 10,
                len: 5
            })
        );
    }

    #[test]
    fn write_range_skips_only_bad_writes() {
        let frame = ramp(10);
        let mut set = UniverseSet::new(1, 5);
        let range = DeviceRange {
            src_start: 0,
            src_end: 10,
            dest_offset: 165,
            reversed: false,
        };
        // 165..170 fit in universe 1, 170.. would need a second universe.
        let result = set.write_range(&range, &frame, 0, scale);
        assert!(matches!(result, Err(EncodeError::UniverseOutOfRange { offset: 170, .. })));
        assert_eq!(set.read_led(169, 0), Ok(frame[4].to_bytes(scale)));
    }
}
