use image::{DynamicImage, ImageDecoder, ImageError, ImageReader};
use std::io::Cursor;

use crate::backend::error::Result;

/// Decodes raw page bytes. With `autorotate` the orientation recorded in the
/// image metadata (EXIF) is applied to the pixels.
pub fn decode_page(bytes: &[u8], autorotate: bool) -> Result<DynamicImage> {
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(ImageError::IoError)?;
    let mut decoder = reader.into_decoder()?;

    if !autorotate {
        return Ok(DynamicImage::from_decoder(decoder)?);
    }

    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::error::ErrorKind;
    use image::{ImageFormat, Rgb, RgbImage};

    /// PNG bytes of a `width`x`height` image filled with `shade`.
    pub(crate) fn png_bytes(width: u32, height: u32, shade: u8) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([shade, shade, shade]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_decode_png() {
        let image = decode_page(&png_bytes(3, 2, 40), true).unwrap();
        assert_eq!((image.width(), image.height()), (3, 2));
        assert_eq!(image.to_rgb8().get_pixel(0, 0), &Rgb([40, 40, 40]));
    }

    #[test]
    fn test_decode_garbage_is_decode_error() {
        let err = decode_page(b"definitely not an image", false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}
