use std::io::Cursor;

use image::{DynamicImage, ImageFormat, ImageReader};

use crate::config::ThumbnailConfig;
use crate::error::ThumbnailError;
use crate::types::Thumbnail;

/// Produces a volume cover thumbnail with known pixel dimensions.
pub(crate) trait ThumbnailResolver: Send + Sync {
    /// Reuse `existing` thumbnail bytes when present, otherwise build one from `source`.
    fn resolve(&self, existing: Option<&[u8]>, source: Option<&[u8]>) -> Result<Thumbnail, ThumbnailError>;
}

pub(crate) struct ImageThumbnailer {
    max_width: u32,
    max_height: u32,
}

impl ImageThumbnailer {
    pub(crate) fn new(config: &ThumbnailConfig) -> Self {
        Self {
            max_width: config.max_width.max(1),
            max_height: config.max_height.max(1),
        }
    }

    fn generate(&self, source: &[u8]) -> Result<Thumbnail, ThumbnailError> {
        let image = image::load_from_memory(source)?;
        let scaled = image.thumbnail(self.max_width, self.max_height);
        let rgb = DynamicImage::ImageRgb8(scaled.to_rgb8());
        let mut bytes = Vec::new();
        rgb.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)?;
        Ok(Thumbnail {
            bytes,
            width: rgb.width(),
            height: rgb.height(),
        })
    }
}

impl ThumbnailResolver for ImageThumbnailer {
    fn resolve(&self, existing: Option<&[u8]>, source: Option<&[u8]>) -> Result<Thumbnail, ThumbnailError> {
        if let Some(bytes) = existing {
            match probe_dimensions(bytes) {
                Ok((width, height)) => {
                    return Ok(Thumbnail {
                        bytes: bytes.to_vec(),
                        width,
                        height,
                    });
                }
                Err(err) => {
                    tracing::debug!(?err, "stored thumbnail unreadable, regenerating");
                }
            }
        }
        let source = source.ok_or(ThumbnailError::NoSource)?;
        self.generate(source)
    }
}

pub(crate) fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32), ThumbnailError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}

#[cfg(test)]
pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(width, height, image::Rgb([200, 40, 40])));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}
