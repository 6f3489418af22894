use std::{
    io::Cursor,
    path::{Path, PathBuf},
};

use image::{codecs::png::PngEncoder, ColorType, ImageEncoder};
use polyfold_shared::{
    color::{linear_to_srgb, srgb_to_linear, unit_float_to_byte},
    log::trace,
    nalgebra::{Vector2, Vector4},
    thiserror, ColorSpace,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to load image '{path}': {error_message}")]
    FailedLoading { path: PathBuf, error_message: String },
    #[error("Failed to encode image '{name}' as PNG: {error_message}")]
    FailedEncoding { name: String, error_message: String },
    #[error("Image '{name}' has no pixels")]
    Empty { name: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Image with linear RGBA pixels. Row 0 is the top row of the image.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub color_space: ColorSpace,
    pub pixels: Vec<Vector4<f32>>,
    /// File the image was loaded from
    pub source_path: Option<PathBuf>,
}

impl Image {
    /// Creates an opaque black image.
    pub fn new(name: impl Into<String>, width: u32, height: u32, color_space: ColorSpace) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            color_space,
            pixels: vec![Vector4::new(0.0, 0.0, 0.0, 1.0); width as usize * height as usize],
            source_path: None,
        }
    }

    /// Loads an image file. sRGB images are decoded to linear values.
    pub fn load(path: impl AsRef<Path>, color_space: ColorSpace) -> Result<Self> {
        let path = path.as_ref();
        let decoded = image::open(path)
            .map_err(|err| Error::FailedLoading {
                path: path.to_owned(),
                error_message: err.to_string(),
            })?
            .to_rgba8();
        let name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".to_owned());
        let mut image = Self::from_rgba8(name, decoded.width(), decoded.height(), color_space, decoded.as_raw())?;
        image.source_path = Some(path.to_owned());
        trace!("Loaded image {} ({}x{})", path.display(), image.width, image.height);
        Ok(image)
    }

    /// Creates an image from encoded 8-bit RGBA data.
    pub fn from_rgba8(name: impl Into<String>, width: u32, height: u32, color_space: ColorSpace, data: &[u8]) -> Result<Self> {
        let name = name.into();
        if width == 0 || height == 0 || data.len() < width as usize * height as usize * 4 {
            return Err(Error::Empty { name });
        }
        let pixels = data
            .chunks_exact(4)
            .take(width as usize * height as usize)
            .map(|rgba| decode_pixel(rgba, color_space))
            .collect();
        Ok(Self {
            name,
            width,
            height,
            color_space,
            pixels,
            source_path: None,
        })
    }

    pub fn pixel(&self, x: u32, y: u32) -> Vector4<f32> {
        self.pixels[self.index(x, y)]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, value: Vector4<f32>) {
        let index = self.index(x, y);
        self.pixels[index] = value;
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Samples the image bilinearly with repeat wrapping. The UV origin is the bottom-left corner.
    pub fn sample(&self, uv: &Vector2<f32>) -> Vector4<f32> {
        if self.pixels.is_empty() {
            return Vector4::zeros();
        }
        let x = uv.x * self.width as f32 - 0.5;
        let y = (1.0 - uv.y) * self.height as f32 - 0.5;
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (x - x0, y - y0);
        let wrap = |value: f32, size: u32| value.rem_euclid(size as f32) as u32 % size;
        let (x0, x1) = (wrap(x0, self.width), wrap(x0 + 1.0, self.width));
        let (y0, y1) = (wrap(y0, self.height), wrap(y0 + 1.0, self.height));
        let top = self.pixel(x0, y0) * (1.0 - fx) + self.pixel(x1, y0) * fx;
        let bottom = self.pixel(x0, y1) * (1.0 - fx) + self.pixel(x1, y1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    /// Encodes the pixels as 8-bit RGBA. sRGB images are encoded with the sRGB transfer function.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|pixel| encode_pixel(pixel, self.color_space))
            .collect()
    }

    /// Encodes the image as PNG.
    pub fn encode_png(&self) -> Result<Vec<u8>> {
        let mut png = Vec::new();
        PngEncoder::new(Cursor::new(&mut png))
            .write_image(&self.to_rgba8(), self.width, self.height, ColorType::Rgba8)
            .map_err(|err| Error::FailedEncoding {
                name: self.name.clone(),
                error_message: err.to_string(),
            })?;
        Ok(png)
    }

    /// Grows the covered area into uncovered pixels by up to `margin` pixels. Every step an
    /// uncovered pixel takes the average of its covered 8-neighbours.
    pub fn dilate(&mut self, covered: &mut [bool], margin: u32) {
        assert_eq!(covered.len(), self.pixels.len(), "coverage mask must match the image size");
        let (width, height) = (self.width as i64, self.height as i64);
        for _ in 0..margin {
            let mut changes = Vec::new();
            for y in 0..height {
                for x in 0..width {
                    let index = (y * width + x) as usize;
                    if covered[index] {
                        continue;
                    }
                    let mut sum = Vector4::zeros();
                    let mut count = 0;
                    for (dx, dy) in NEIGHBOURS {
                        let (nx, ny) = (x + dx, y + dy);
                        if nx < 0 || ny < 0 || nx >= width || ny >= height {
                            continue;
                        }
                        let neighbour = (ny * width + nx) as usize;
                        if covered[neighbour] {
                            sum += self.pixels[neighbour];
                            count += 1;
                        }
                    }
                    if count > 0 {
                        changes.push((index, sum / count as f32));
                    }
                }
            }
            if changes.is_empty() {
                break;
            }
            for (index, value) in changes {
                self.pixels[index] = value;
                covered[index] = true;
            }
        }
    }
}

const NEIGHBOURS: [(i64, i64); 8] = [(-1, -1), (0, -1), (1, -1), (-1, 0), (1, 0), (-1, 1), (0, 1), (1, 1)];

fn decode_pixel(rgba: &[u8], color_space: ColorSpace) -> Vector4<f32> {
    let unit = |channel: u8| channel as f32 / 255.0;
    match color_space {
        ColorSpace::Srgb => Vector4::new(
            srgb_to_linear(unit(rgba[0])),
            srgb_to_linear(unit(rgba[1])),
            srgb_to_linear(unit(rgba[2])),
            unit(rgba[3]),
        ),
        ColorSpace::NonColor => Vector4::new(unit(rgba[0]), unit(rgba[1]), unit(rgba[2]), unit(rgba[3])),
    }
}

fn encode_pixel(pixel: &Vector4<f32>, color_space: ColorSpace) -> [u8; 4] {
    match color_space {
        ColorSpace::Srgb => [
            unit_float_to_byte(linear_to_srgb(pixel.x)),
            unit_float_to_byte(linear_to_srgb(pixel.y)),
            unit_float_to_byte(linear_to_srgb(pixel.z)),
            unit_float_to_byte(pixel.w),
        ],
        ColorSpace::NonColor => [pixel.x, pixel.y, pixel.z, pixel.w].map(unit_float_to_byte),
    }
}
