//! Light colors and their conversion to transmission bytes.

/// Gamma used when nothing else is configured.
pub const DEFAULT_GAMMA: f32 = 2.2;

/// A single LED's color, each channel nominally in 0..1.
///
/// Values outside that range are allowed here; they get clamped when the
/// color is turned into bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LightColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl LightColor {
    pub const BLACK: LightColor = LightColor { r: 0.0, g: 0.0, b: 0.0 };

    pub fn new(r: f32, g: f32, b: f32) -> LightColor {
        LightColor { r, g, b }
    }

    /// Helper for building a color from raw 0..255 channel values.
    pub fn from_bytes(red: u8, green: u8, blue: u8) -> LightColor {
        LightColor {
            r: red as f32 / 255.0,
            g: green as f32 / 255.0,
            b: blue as f32 / 255.0,
        }
    }

    /// Turn the color into three bytes using the given per-channel encoder.
    pub fn to_bytes<F: Fn(f32) -> u8>(&self, encode: F) -> [u8; 3] {
        [encode(self.r), encode(self.g), encode(self.b)]
    }
}

/// One animation frame: a color per LED, in installation order.
pub type LogicalFrame = Vec<LightColor>;

fn clamp(num: f32, min: f32, max: f32) -> f32 {
    // NaN falls through to the minimum.
    if num > max {
        max
    } else if num >= min {
        num
    } else {
        min
    }
}

/// Clamp to 0..1 and scale to a byte, without any gamma.
pub fn scale(value: f32) -> u8 {
    (clamp(value, 0.0, 1.0) * 255.0) as u8
}

/// Power-law intensity correction applied before transmission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gamma(pub f32);

impl Default for Gamma {
    fn default() -> Gamma {
        Gamma(DEFAULT_GAMMA)
    }
}

impl Gamma {
    /// Map a normalized intensity to a transmission byte.
    ///
    /// The input is clamped before `powf`, so out-of-range values never
    /// produce NaN.
    pub fn encode(&self, value: f32) -> u8 {
        let corrected = clamp(value, 0.0, 1.0).powf(1.0 / self.0);
        (clamp(corrected, 0.0, 1.0) * 255.0) as u8
    }
}
