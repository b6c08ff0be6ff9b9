//! RGBA floating point textures

use crate::error::{Error, Result};
use crate::point::Point2f;
use image::{Rgba, RgbaImage};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// Texture lookup filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureFilter {
    Nearest,
    #[default]
    Bilinear,
}

/// A `height x width x 4` RGBA texture with `f32` channels.
///
/// Texel `(x, y)` covers UV `[x/W, (x+1)/W] x [y/H, (y+1)/H]`, so row 0 sits
/// at `v = 0`. Lookups wrap (repeat addressing).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Texture {
    data: Array3<f32>,
}

impl Texture {
    /// Create a black, fully transparent texture
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            data: Array3::zeros((height, width, 4)),
        }
    }

    pub fn filled(width: usize, height: usize, value: [f32; 4]) -> Self {
        Self::from_fn(width, height, |_, _| value)
    }

    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> [f32; 4]) -> Self {
        let mut data = Array3::zeros((height, width, 4));
        for y in 0..height {
            for x in 0..width {
                let value = f(x, y);
                for c in 0..4 {
                    data[[y, x, c]] = value[c];
                }
            }
        }
        Self { data }
    }

    /// Build a texture from row-major RGBA texels
    pub fn from_texels(width: usize, height: usize, texels: Vec<[f32; 4]>) -> Result<Self> {
        if texels.len() != width * height {
            return Err(Error::InvalidInput(format!(
                "expected {} texels for a {width}x{height} texture, got {}",
                width * height,
                texels.len()
            )));
        }
        let flat: Vec<f32> = texels.into_iter().flatten().collect();
        let data = Array3::from_shape_vec((height, width, 4), flat)
            .map_err(|e| Error::InvalidInput(e.to_string()))?;
        Ok(Self { data })
    }

    pub fn width(&self) -> usize {
        self.data.shape()[1]
    }

    pub fn height(&self) -> usize {
        self.data.shape()[0]
    }

    pub fn data(&self) -> &Array3<f32> {
        &self.data
    }

    pub fn get(&self, x: usize, y: usize) -> [f32; 4] {
        [
            self.data[[y, x, 0]],
            self.data[[y, x, 1]],
            self.data[[y, x, 2]],
            self.data[[y, x, 3]],
        ]
    }

    pub fn set(&mut self, x: usize, y: usize, value: [f32; 4]) {
        for (c, v) in value.iter().enumerate() {
            self.data[[y, x, c]] = *v;
        }
    }

    /// Texels as a flat row-major slice of RGBA values.
    ///
    /// `None` when the buffer is not contiguous in standard layout.
    pub fn texels(&self) -> Option<&[[f32; 4]]> {
        let flat = self.data.as_slice()?;
        bytemuck::try_cast_slice(flat).ok()
    }

    /// Sample at `uv` with repeat wrapping
    pub fn sample(&self, uv: Point2f, filter: TextureFilter) -> [f32; 4] {
        let (w, h) = (self.width(), self.height());
        if w == 0 || h == 0 {
            return [0.0; 4];
        }
        let wrap = |i: i64, n: usize| i.rem_euclid(n as i64) as usize;

        match filter {
            TextureFilter::Nearest => {
                let x = wrap((uv.x * w as f32).floor() as i64, w);
                let y = wrap((uv.y * h as f32).floor() as i64, h);
                self.get(x, y)
            }
            TextureFilter::Bilinear => {
                let fx = uv.x * w as f32 - 0.5;
                let fy = uv.y * h as f32 - 0.5;
                let x0 = fx.floor();
                let y0 = fy.floor();
                let tx = fx - x0;
                let ty = fy - y0;
                let (x0, y0) = (x0 as i64, y0 as i64);
                let xs = [wrap(x0, w), wrap(x0 + 1, w)];
                let ys = [wrap(y0, h), wrap(y0 + 1, h)];

                let mut out = [0.0; 4];
                let weights = [
                    (xs[0], ys[0], (1.0 - tx) * (1.0 - ty)),
                    (xs[1], ys[0], tx * (1.0 - ty)),
                    (xs[0], ys[1], (1.0 - tx) * ty),
                    (xs[1], ys[1], tx * ty),
                ];
                for (x, y, weight) in weights {
                    let texel = self.get(x, y);
                    for c in 0..4 {
                        out[c] += texel[c] * weight;
                    }
                }
                out
            }
        }
    }

    /// Convert an 8-bit image, mapping `0..=255` to `[0, 1]`
    pub fn from_image(image: &RgbaImage) -> Self {
        Self::from_fn(image.width() as usize, image.height() as usize, |x, y| {
            let p = image.get_pixel(x as u32, y as u32).0;
            [
                p[0] as f32 / 255.0,
                p[1] as f32 / 255.0,
                p[2] as f32 / 255.0,
                p[3] as f32 / 255.0,
            ]
        })
    }

    /// Quantise to an 8-bit image, clamping to `[0, 1]`
    pub fn to_image(&self) -> RgbaImage {
        let quantize = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        RgbaImage::from_fn(self.width() as u32, self.height() as u32, |x, y| {
            let t = self.get(x as usize, y as usize);
            Rgba([quantize(t[0]), quantize(t[1]), quantize(t[2]), quantize(t[3])])
        })
    }
}
