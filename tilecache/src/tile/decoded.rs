//! Decoded tile images.

use std::io::Cursor;

use thiserror::Error;

use super::TileFormat;

/// Errors from decoding a tile payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload was empty.
    #[error("Empty tile payload")]
    Empty,

    /// The codec rejected the payload.
    #[error("Problem with tile image: {0}")]
    Image(#[from] image::ImageError),
}

/// A tile decoded to RGBA8 pixels.
#[derive(Clone, PartialEq, Eq)]
pub struct DecodedImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl DecodedImage {
    /// Build an image from raw RGBA8 pixels.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Decode a payload.
    ///
    /// The format tag selects the codec when `image` recognises it;
    /// otherwise the codec is guessed from the payload's magic bytes.
    pub fn decode(bytes: &[u8], format: &TileFormat) -> Result<Self, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }

        let decoded = match format.image_format() {
            Some(fmt) => image::load_from_memory_with_format(bytes, fmt)?,
            None => image::load_from_memory(bytes)?,
        };
        let rgba = decoded.to_rgba8();

        Ok(Self {
            width: rgba.width(),
            height: rgba.height(),
            pixels: rgba.into_raw(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Size of the pixel buffer in bytes.
    pub fn byte_size(&self) -> u64 {
        self.pixels.len() as u64
    }

    /// Encode the image as PNG.
    pub fn to_png(&self) -> Result<Vec<u8>, DecodeError> {
        let mut out = Cursor::new(Vec::new());
        image::write_buffer_with_format(
            &mut out,
            &self.pixels,
            self.width,
            self.height,
            image::ExtendedColorType::Rgba8,
            image::ImageFormat::Png,
        )?;
        Ok(out.into_inner())
    }
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// PNG bytes of a solid `w`x`h` image, for tests.
#[cfg(test)]
pub(crate) fn png_bytes(w: u32, h: u32) -> Vec<u8> {
    let pixels = vec![0x7f; (w * h * 4) as usize];
    DecodedImage::from_rgba(w, h, pixels)
        .to_png()
        .expect("encode test png")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_png() {
        let bytes = png_bytes(4, 2);
        let image = DecodedImage::decode(&bytes, &TileFormat::png()).unwrap();
        assert_eq!(image.width(), 4);
        assert_eq!(image.height(), 2);
        assert_eq!(image.byte_size(), 4 * 2 * 4);
    }

    #[test]
    fn test_decode_guesses_unknown_tag() {
        let bytes = png_bytes(1, 1);
        let format = TileFormat::new("tile").unwrap();
        assert!(DecodedImage::decode(&bytes, &format).is_ok());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = DecodedImage::decode(b"not an image", &TileFormat::png()).unwrap_err();
        assert!(matches!(err, DecodeError::Image(_)));
        assert!(err.to_string().starts_with("Problem with tile image"));
    }

    #[test]
    fn test_decode_rejects_empty() {
        let err = DecodedImage::decode(&[], &TileFormat::png()).unwrap_err();
        assert!(matches!(err, DecodeError::Empty));
    }
}
