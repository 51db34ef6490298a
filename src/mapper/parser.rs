//! Range map file parser.
//!
//! One directive per line:
//!
//! ```text
//! # comment
//! host <name> <startUniverse>
//! r <start> <end> <name> <destOffset>
//! i <start> <end> <name> <destOffset>
//! ```
//!
//! `r` maps logical LEDs `start..end` forward, `i` maps them reversed. A
//! host name may carry a `-suffix` to tell apart several hosts sharing an
//! address; the suffix is dropped when the name is used as an address.

use std::path::Path;
use std::str::{FromStr, SplitWhitespace};
use std::{fs, io};

use thiserror::Error;
use tracing::{info, warn};

use crate::host::DeviceRange;
use crate::protocol::{num_universes, MAX_UNIVERSE};

/// A destination and the ranges routed to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTarget {
    /// Name exactly as written in the file.
    pub name: String,
    /// First universe number this host listens on.
    pub start_universe: u16,
    pub ranges: Vec<DeviceRange>,
    /// Highest destination offset referenced, plus one.
    pub data_extent: usize,
}

impl HostTarget {
    pub fn new(name: &str, start_universe: u16) -> HostTarget {
        HostTarget {
            name: name.to_string(),
            start_universe,
            ranges: vec![],
            data_extent: 0,
        }
    }

    /// Network address: the name without its disambiguating suffix.
    pub fn address(&self) -> &str {
        match self.name.find('-') {
            Some(n) if n > 0 => &self.name[..n],
            _ => &self.name,
        }
    }

    /// Universes needed to cover `data_extent`.
    pub fn num_universes(&self) -> usize {
        num_universes(self.data_extent)
    }

    /// Universe number `extent` LEDs would end on, if it is a valid one.
    fn last_universe(&self, extent: usize) -> Option<u16> {
        let count = u16::try_from(num_universes(extent)).ok()?;
        self.start_universe
            .checked_add(count - 1)
            .filter(|last| *last <= MAX_UNIVERSE)
    }

    fn add_range(&mut self, range: DeviceRange) {
        self.data_extent = self.data_extent.max(range.dest_end());
        self.ranges.push(range);
    }
}

pub type RangeMapResult<T> = Result<T, RangeMapError>;

/// Problems with a single line. None of these abort a load.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RangeMapError {
    #[error("line {line}: missing {field}")]
    MissingField { line: usize, field: &'static str },
    #[error("line {line}: invalid {field} '{value}'")]
    InvalidNumber {
        line: usize,
        field: &'static str,
        value: String,
    },
    #[error("line {line}: invalid range {start} > {end}")]
    InvalidRange { line: usize, start: usize, end: usize },
    #[error("line {line}: offset {offset} overflows")]
    OffsetOverflow { line: usize, offset: usize },
    #[error("line {line}: host '{host}' would need universes past {max}", max = MAX_UNIVERSE)]
    UniverseOutOfRange { line: usize, host: String },
    #[error("line {line}: unknown host '{host}'")]
    UnknownHost { line: usize, host: String },
    #[error("line {line}: unknown command '{command}'")]
    UnknownCommand { line: usize, command: String },
}

/// Parsed host/range configuration.
#[derive(Debug, Default, Clone)]
pub struct RangeMap {
    pub hosts: Vec<HostTarget>,
    /// Lines that were skipped, in file order.
    pub skipped: Vec<RangeMapError>,
}

/// Whitespace tokenizer that knows which line it is on.
struct Fields<'a> {
    line: usize,
    tokens: SplitWhitespace<'a>,
}

impl<'a> Fields<'a> {
    fn word(&mut self, field: &'static str) -> RangeMapResult<&'a str> {
        self.tokens.next().ok_or(RangeMapError::MissingField {
            line: self.line,
            field,
        })
    }

    fn number<T: FromStr>(&mut self, field: &'static str) -> RangeMapResult<T> {
        let word = self.word(field)?;
        word.parse().map_err(|_| RangeMapError::InvalidNumber {
            line: self.line,
            field,
            value: word.to_string(),
        })
    }
}

impl RangeMap {
    /// Parse a whole range map. Bad lines are logged and skipped.
    pub fn parse(text: &str) -> RangeMap {
        let mut map = RangeMap::default();
        for (index, line) in text.lines().enumerate() {
            if let Err(err) = map.parse_line(index + 1, line) {
                warn!("[ranges] Skipping {}", err);
                map.skipped.push(err);
            }
        }
        map
    }

    /// Look up a host by the name it was declared with.
    pub fn host(&self, name: &str) -> Option<&HostTarget> {
        self.hosts.iter().find(|host| host.name == name)
    }

    fn parse_line(&mut self, line: usize, text: &str) -> RangeMapResult<()> {
        let text = text.trim();
        if text.is_empty() || text.starts_with('#') {
            return Ok(());
        }

        let mut fields = Fields {
            line,
            tokens: text.split_whitespace(),
        };
        match fields.word("command")? {
            "host" => {
                let name = fields.word("host name")?;
                let start_universe = fields.number("start universe")?;
                if start_universe == 0 || start_universe > MAX_UNIVERSE {
                    return Err(RangeMapError::UniverseOutOfRange {
                        line,
                        host: name.to_string(),
                    });
                }
                info!("[ranges] Adding host {}, start universe {}", name, start_universe);
                self.hosts.push(HostTarget::new(name, start_universe));
                Ok(())
            }
            cmd @ ("r" | "i") => {
                let start: usize = fields.number("start")?;
                let end: usize = fields.number("end")?;
                if start > end {
                    return Err(RangeMapError::InvalidRange { line, start, end });
                }
                let name = fields.word("host name")?;
                let host = match self.hosts.iter_mut().find(|host| host.name == name) {
                    Some(host) => host,
                    None => {
                        return Err(RangeMapError::UnknownHost {
                            line,
                            host: name.to_string(),
                        })
                    }
                };
                let dest_offset: usize = fields.number("offset")?;
                let dest_end = dest_offset
                    .checked_add(end - start)
                    .ok_or(RangeMapError::OffsetOverflow {
                        line,
                        offset: dest_offset,
                    })?;
                if host.last_universe(host.data_extent.max(dest_end)).is_none() {
                    return Err(RangeMapError::UniverseOutOfRange {
                        line,
                        host: name.to_string(),
                    });
                }
                info!("[ranges] Adding range; host {}, start {}, end {}", name, start, end);
                host.add_range(DeviceRange {
                    src_start: start,
                    src_end: end,
                    dest_offset,
                    reversed: cmd == "i",
                });
                Ok(())
            }
            other => Err(RangeMapError::UnknownCommand {
                line,
                command: other.to_string(),
            }),
        }
    }
}

/// Read and parse a range map file.
pub fn read_ranges_file<T: AsRef<Path>>(path: T) -> io::Result<RangeMap> {
    let text = fs::read_to_string(path)?;
    Ok(RangeMap::parse(&text))
}
