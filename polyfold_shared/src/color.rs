use nalgebra::Vector4;
use serde::{Deserialize, Serialize};

/// Color with 8 bits per channel. The channels are stored in sRGB encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteColor4 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl ByteColor4 {
    pub const WHITE: ByteColor4 = ByteColor4::new(255, 255, 255, 255);
    pub const BLACK: ByteColor4 = ByteColor4::new(0, 0, 0, 255);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Creates a color from floats in `[0, 1]` that are already sRGB encoded.
    pub fn from_unit_floats(rgba: [f32; 4]) -> Self {
        let [r, g, b, a] = rgba.map(unit_float_to_byte);
        Self { r, g, b, a }
    }

    /// Returns the channels as floats in `[0, 1]` without changing the encoding.
    pub fn to_unit_floats(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a].map(|channel| channel as f32 / 255.0)
    }

    /// Decodes the sRGB channels into linear RGB. Alpha is always linear.
    pub fn to_linear(self) -> Vector4<f32> {
        Vector4::new(
            srgb_to_linear(self.r as f32 / 255.0),
            srgb_to_linear(self.g as f32 / 255.0),
            srgb_to_linear(self.b as f32 / 255.0),
            self.a as f32 / 255.0,
        )
    }

    /// Encodes a linear color as sRGB bytes.
    pub fn from_linear(color: &Vector4<f32>) -> Self {
        Self::from_unit_floats([
            linear_to_srgb(color.x),
            linear_to_srgb(color.y),
            linear_to_srgb(color.z),
            color.w,
        ])
    }
}

impl From<[u8; 4]> for ByteColor4 {
    fn from([r, g, b, a]: [u8; 4]) -> Self {
        Self { r, g, b, a }
    }
}

impl From<ByteColor4> for [u8; 4] {
    fn from(color: ByteColor4) -> Self {
        [color.r, color.g, color.b, color.a]
    }
}

/// Describes how the values of an image are to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSpace {
    /// Color data. Stored linearly, encoded as sRGB when written.
    Srgb,
    /// Data that is not a color (e.g. normals). Never transformed.
    NonColor,
}

pub fn unit_float_to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

pub fn srgb_to_linear(value: f32) -> f32 {
    if value <= 0.04045 {
        value / 12.92
    } else {
        ((value + 0.055) / 1.055).powf(2.4)
    }
}

pub fn linear_to_srgb(value: f32) -> f32 {
    let value = value.clamp(0.0, 1.0);
    if value <= 0.0031308 {
        value * 12.92
    } else {
        1.055 * value.powf(1.0 / 2.4) - 0.055
    }
}
