//! RGB sample decoding and verification against a reference effect

use std::f64::consts::PI;
use std::fmt;

use serde::Serialize;
use zerocopy::byteorder::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct RawRgbSample {
    pub timestamp: U32,
    pub led: u8,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

pub const RGB_SAMPLE_SIZE: usize = std::mem::size_of::<RawRgbSample>();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct RgbColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl RgbColor {
    pub const BLACK: Self = Self::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Every channel within `tolerance` of `other`
    pub fn within(self, other: Self, tolerance: u8) -> bool {
        self.r.abs_diff(other.r) <= tolerance
            && self.g.abs_diff(other.g) <= tolerance
            && self.b.abs_diff(other.b) <= tolerance
    }

    /// Scale every channel by `factor` in `0.0..=1.0`
    pub fn scaled(self, factor: f64) -> Self {
        let f = factor.clamp(0.0, 1.0);
        let ch = |c: u8| (c as f64 * f).round() as u8;
        Self::new(ch(self.r), ch(self.g), ch(self.b))
    }
}

impl fmt::Display for RgbColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// One LED sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RgbSample {
    /// Core cycle the LED frame was latched on
    pub timestamp: u32,
    pub led: u8,
    pub color: RgbColor,
}

impl RgbSample {
    pub fn new(timestamp: u32, led: u8, color: RgbColor) -> Self {
        Self {
            timestamp,
            led,
            color,
        }
    }

    pub fn to_raw(self) -> RawRgbSample {
        RawRgbSample {
            timestamp: U32::new(self.timestamp),
            led: self.led,
            r: self.color.r,
            g: self.color.g,
            b: self.color.b,
        }
    }
}

impl From<RawRgbSample> for RgbSample {
    fn from(raw: RawRgbSample) -> Self {
        Self::new(raw.timestamp.get(), raw.led, RgbColor::new(raw.r, raw.g, raw.b))
    }
}

pub fn decode_samples(bytes: &[u8]) -> Vec<RgbSample> {
    bytes
        .chunks_exact(RGB_SAMPLE_SIZE)
        .filter_map(|chunk| RawRgbSample::read_from_bytes(chunk).ok())
        .map(RgbSample::from)
        .collect()
}

/// Samples sharing a timestamp: one latched LED frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
    pub timestamp: u32,
    pub leds: Vec<(u8, RgbColor)>,
}

pub fn group_frames(samples: &[RgbSample]) -> Vec<RgbFrame> {
    let mut frames: Vec<RgbFrame> = Vec::new();
    for s in samples {
        match frames.last_mut() {
            Some(frame) if frame.timestamp == s.timestamp => frame.leds.push((s.led, s.color)),
            _ => frames.push(RgbFrame {
                timestamp: s.timestamp,
                leds: vec![(s.led, s.color)],
            }),
        }
    }
    frames
}

// ============================================================================
// Reference effects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReferenceEffect {
    Off,
    Static(RgbColor),
    /// Raised-cosine breathing, dark at phase 0, full `color` at half period
    Breathing { color: RgbColor, period_cycles: u32 },
}

impl ReferenceEffect {
    /// Expected color at core cycle `timestamp`
    pub fn expected_at(&self, timestamp: u32) -> RgbColor {
        match *self {
            Self::Off => RgbColor::BLACK,
            Self::Static(color) => color,
            Self::Breathing {
                color,
                period_cycles,
            } => {
                if period_cycles == 0 {
                    return color;
                }
                let phase = (timestamp % period_cycles) as f64 / period_cycles as f64;
                color.scaled((1.0 - (2.0 * PI * phase).cos()) / 2.0)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbMismatch {
    pub sample: RgbSample,
    pub expected: RgbColor,
}

impl fmt::Display for RgbMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "LED {} at cycle {}: got {}, expected {}",
            self.sample.led, self.sample.timestamp, self.sample.color, self.expected
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RgbVerification {
    pub checked: usize,
    pub mismatches: Vec<RgbMismatch>,
}

impl RgbVerification {
    pub fn is_ok(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Compare every sample against the effect, channel by channel
pub fn verify(samples: &[RgbSample], effect: &ReferenceEffect, tolerance: u8) -> RgbVerification {
    let mismatches = samples
        .iter()
        .filter_map(|s| {
            let expected = effect.expected_at(s.timestamp);
            (!s.color.within(expected, tolerance)).then_some(RgbMismatch {
                sample: *s,
                expected,
            })
        })
        .collect();
    RgbVerification {
        checked: samples.len(),
        mismatches,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: RgbColor = RgbColor::new(200, 0, 0);

    #[test]
    fn test_sample_layout() {
        assert_eq!(RGB_SAMPLE_SIZE, 8);
        let s = RgbSample::new(0x10, 3, RgbColor::new(1, 2, 3));
        assert_eq!(s.to_raw().as_bytes(), &[0x10, 0, 0, 0, 3, 1, 2, 3]);
        assert_eq!(decode_samples(s.to_raw().as_bytes()), vec![s]);
    }

    #[test]
    fn test_breathing_profile() {
        let effect = ReferenceEffect::Breathing {
            color: RED,
            period_cycles: 1000,
        };
        assert_eq!(effect.expected_at(0), RgbColor::BLACK);
        assert_eq!(effect.expected_at(500), RED);
        assert_eq!(effect.expected_at(1500), RED);
        assert_eq!(effect.expected_at(250), RgbColor::new(100, 0, 0));
    }

    #[test]
    fn test_verify_reports_each_mismatch() {
        let samples = vec![
            RgbSample::new(0, 0, RgbColor::new(198, 1, 0)),
            RgbSample::new(0, 1, RgbColor::new(150, 0, 0)),
            RgbSample::new(10, 0, RgbColor::BLACK),
        ];
        let result = verify(&samples, &ReferenceEffect::Static(RED), 3);
        assert_eq!(result.checked, 3);
        assert_eq!(result.mismatches.len(), 2);
        assert_eq!(result.mismatches[0].sample.led, 1);
        assert!(!result.is_ok());

        assert!(verify(&[], &ReferenceEffect::Off, 0).is_ok());
    }

    #[test]
    fn test_group_frames() {
        let samples = vec![
            RgbSample::new(0, 0, RED),
            RgbSample::new(0, 1, RED),
            RgbSample::new(5, 0, RgbColor::BLACK),
        ];
        let frames = group_frames(&samples);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].leds.len(), 2);
        assert_eq!(frames[1].timestamp, 5);
    }
}
