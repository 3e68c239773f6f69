use base64::{
    alphabet,
    engine::{general_purpose::GeneralPurpose, DecodePaddingMode, GeneralPurposeConfig},
    Engine as _,
};
use image::{imageops::FilterType, DynamicImage, GrayImage, Luma};
use ndarray::{Array, Ix4};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Error reading image: {0}")]
    Read(#[from] std::io::Error),
    #[error("Error decoding image: {0}")]
    Decode(#[from] image::ImageError),
}

// Browser and scanner exports do not always zero the final bits or pad.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(true)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Decodes a base64 payload, accepting both bare strings and data URLs
/// (`data:image/png;base64,...`). Characters outside the base64 alphabet
/// are dropped before decoding.
pub fn decode_image(img_data: &str) -> Result<Vec<u8>, PreprocessError> {
    let payload = match img_data.split_once(',') {
        Some((_, data)) => data,
        None => img_data,
    };
    let payload: String = payload
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
        .collect();

    Ok(LENIENT.decode(payload)?)
}

/// Turns encoded image bytes into a `[1, size, size, 1]` tensor of
/// grayscale intensities scaled to `[0, 1]`.
pub fn prepare_image(image_bytes: &[u8], size: u32) -> Result<Array<f32, Ix4>, PreprocessError> {
    let image_reader =
        image::ImageReader::new(std::io::Cursor::new(image_bytes)).with_guessed_format()?;
    let original_img = image_reader.decode()?;

    let gray = to_luma(&original_img);
    let img = image::imageops::resize(&gray, size, size, FilterType::CatmullRom);

    let side = size as usize;
    let mut input = Array::zeros((1, side, side, 1));
    for (x, y, pixel) in img.enumerate_pixels() {
        input[[0, y as usize, x as usize, 0]] = (pixel.0[0] as f32) / 255.;
    }

    Ok(input)
}

// ITU-R 601-2 luma in 16.16 fixed point, so color inputs land on the same
// intensities the model was trained on.
fn to_luma(img: &DynamicImage) -> GrayImage {
    if let DynamicImage::ImageLuma8(gray) = img {
        return gray.clone();
    }

    let rgb = img.to_rgb8();
    GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
        let [r, g, b] = rgb.get_pixel(x, y).0;
        let l = (r as u32 * 19595 + g as u32 * 38470 + b as u32 * 7471 + 0x8000) >> 16;
        Luma([l as u8])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose;
    use image::{ImageBuffer, Rgb};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(width, height, Rgb(color));
        let mut image_data: Vec<u8> = Vec::new();
        img.write_to(&mut Cursor::new(&mut image_data), image::ImageFormat::Png)
            .unwrap();
        image_data
    }

    #[test]
    fn test_decode_image_strips_data_url_prefix() {
        let bytes = png_bytes(4, 4, [0, 0, 0]);
        let encoded = general_purpose::STANDARD.encode(&bytes);

        let bare = decode_image(&encoded).unwrap();
        let data_url = decode_image(&format!("data:image/png;base64,{}", encoded)).unwrap();

        assert_eq!(bare, bytes);
        assert_eq!(data_url, bytes);
    }

    #[test]
    fn test_decode_image_ignores_line_breaks() {
        let encoded = general_purpose::STANDARD.encode(b"some image bytes");
        let (head, tail) = encoded.split_at(8);

        let decoded = decode_image(&format!("{}\n{}\r\n", head, tail)).unwrap();

        assert_eq!(decoded, b"some image bytes");
    }

    #[test]
    fn test_decode_image_rejects_invalid_base64() {
        let result = decode_image("abcde");

        assert!(matches!(result, Err(PreprocessError::Base64(_))));
    }

    #[test]
    fn test_decode_image_is_lenient_like_common_encoders() {
        // Non-zero trailing bits after the last full byte.
        assert_eq!(decode_image("YR==").unwrap(), b"a");
        // Missing padding.
        assert_eq!(decode_image("YWI").unwrap(), b"ab");
        // Stray characters outside the alphabet.
        assert_eq!(decode_image("YW*J-j").unwrap(), b"abc");
    }

    #[test]
    fn test_prepare_image_shape_and_range() {
        let bytes = png_bytes(100, 60, [255, 255, 255]);

        let input = prepare_image(&bytes, 168).unwrap();

        assert_eq!(input.shape(), &[1, 168, 168, 1]);
        assert!(input.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!((input[[0, 84, 84, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_prepare_image_uses_luma_weights() {
        let red = prepare_image(&png_bytes(8, 8, [255, 0, 0]), 8).unwrap();
        let green = prepare_image(&png_bytes(8, 8, [0, 255, 0]), 8).unwrap();

        assert!((red[[0, 4, 4, 0]] - 76.0 / 255.0).abs() < 1e-6);
        assert!((green[[0, 4, 4, 0]] - 150.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_prepare_image_rejects_garbage() {
        let result = prepare_image(b"definitely not an image", 168);

        assert!(result.is_err());
    }
}
