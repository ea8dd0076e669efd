use anyhow::{Context, bail};

use crate::resources::load_binary;

/// A decoded equirectangular environment in linear RGBA f32.
#[derive(Clone, Debug, PartialEq)]
pub struct EquirectImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<f32>,
}

impl EquirectImage {
    pub fn texel(&self, x: u32, y: u32) -> [f32; 4] {
        let at = ((y * self.width + x) * 4) as usize;
        [self.data[at], self.data[at + 1], self.data[at + 2], self.data[at + 3]]
    }

    /// A nearest-neighbour copy whose sides both fit `max_dimension`, or
    /// `None` when the image already fits. The aspect ratio is kept.
    pub fn downsampled(&self, max_dimension: u32) -> Option<EquirectImage> {
        let longest = self.width.max(self.height);
        if longest <= max_dimension || max_dimension == 0 {
            return None;
        }
        let scale = |side: u32| ((side as u64 * max_dimension as u64) / longest as u64).max(1) as u32;
        let (width, height) = (scale(self.width), scale(self.height));
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for y in 0..height {
            let src_y = (y as u64 * self.height as u64 / height as u64) as u32;
            for x in 0..width {
                let src_x = (x as u64 * self.width as u64 / width as u64) as u32;
                data.extend_from_slice(&self.texel(src_x, src_y));
            }
        }
        Some(EquirectImage {
            width,
            height,
            data,
        })
    }
}

/// Decodes an HDR/EXR (or any other `image` format) panorama.
pub fn decode_equirect(bytes: &[u8], name: &str) -> anyhow::Result<EquirectImage> {
    let img = image::load_from_memory(bytes).with_context(|| format!("decoding {name}"))?;
    let rgba = img.to_rgba32f();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        bail!("{name} is empty");
    }
    if width != height * 2 {
        log::warn!("{name} is {width}x{height}, equirectangular maps are usually 2:1");
    }
    Ok(EquirectImage {
        width,
        height,
        data: rgba.into_raw(),
    })
}

pub async fn load_equirect(url: &str) -> anyhow::Result<EquirectImage> {
    let bytes = load_binary(url).await?;
    decode_equirect(&bytes, url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::io::Cursor;

    #[test]
    fn exr_panoramas_decode_to_linear_floats() {
        let img = image::Rgba32FImage::from_fn(4, 2, |x, y| {
            image::Rgba([x as f32 * 2.5, y as f32, 0.125, 1.0])
        });
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba32F(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::OpenExr)
            .unwrap();

        let decoded = decode_equirect(&bytes, "sky.exr").unwrap();
        assert_eq!((decoded.width, decoded.height), (4, 2));
        assert_eq!(decoded.data.len(), 4 * 2 * 4);
        let [r, g, b, a] = decoded.texel(3, 1);
        assert_relative_eq!(r, 7.5, epsilon = 1e-3);
        assert_relative_eq!(g, 1.0, epsilon = 1e-3);
        assert_relative_eq!(b, 0.125, epsilon = 1e-3);
        assert_relative_eq!(a, 1.0, epsilon = 1e-3);
    }

    #[test]
    fn oversized_panoramas_shrink_keeping_aspect() {
        let image = EquirectImage {
            width: 8,
            height: 4,
            data: (0..8 * 4).flat_map(|i| [i as f32, 0.0, 0.0, 1.0]).collect(),
        };
        assert!(image.downsampled(8).is_none());

        let small = image.downsampled(4).unwrap();
        assert_eq!((small.width, small.height), (4, 2));
        assert_eq!(small.data.len(), 4 * 2 * 4);
        // texel (1, 1) of the half size copy comes from (2, 2)
        assert_eq!(small.texel(1, 1)[0], (2 * 8 + 2) as f32);
    }

    #[test]
    fn tall_panoramas_shrink_to_fit_their_height() {
        let image = EquirectImage {
            width: 4,
            height: 16,
            data: vec![0.5; 4 * 16 * 4],
        };
        assert!(image.downsampled(16).is_none());

        let small = image.downsampled(8).unwrap();
        assert_eq!((small.width, small.height), (2, 8));
        assert!(small.width <= 8 && small.height <= 8);
        assert_eq!(small.data.len(), 2 * 8 * 4);
    }

    #[test]
    fn garbage_is_an_error() {
        let err = decode_equirect(b"definitely not an image", "broken.hdr").unwrap_err();
        assert!(format!("{err:#}").contains("broken.hdr"));
    }
}
