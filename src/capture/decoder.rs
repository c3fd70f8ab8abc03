use image::RgbImage;
use jpeg_decoder::{Decoder, PixelFormat as JpegPixelFormat};

use super::frame::{Frame, PixelFormat};
use crate::error::FrameError;

/// Decode a captured frame into packed RGB
pub fn decode_frame(frame: &Frame) -> Result<RgbImage, FrameError> {
    decode_bytes(
        &frame.data,
        frame.meta.format,
        frame.meta.width,
        frame.meta.height,
    )
}

pub fn decode_bytes(
    data: &[u8],
    format: PixelFormat,
    width: u32,
    height: u32,
) -> Result<RgbImage, FrameError> {
    match format {
        PixelFormat::Mjpeg => decode_jpeg(data),
        PixelFormat::Rgb24 => {
            let pixels = take_exact(data, width as usize * height as usize * 3)?;
            into_image(width, height, pixels.to_vec())
        }
        PixelFormat::Bgr24 => {
            let pixels = take_exact(data, width as usize * height as usize * 3)?;
            let mut rgb = Vec::with_capacity(pixels.len());
            for chunk in pixels.chunks_exact(3) {
                rgb.extend_from_slice(&[chunk[2], chunk[1], chunk[0]]);
            }
            into_image(width, height, rgb)
        }
        PixelFormat::Yuyv4 => {
            let pixels = take_exact(data, width as usize * height as usize * 2)?;
            into_image(width, height, yuyv_to_rgb(pixels))
        }
    }
}

fn decode_jpeg(data: &[u8]) -> Result<RgbImage, FrameError> {
    let mut decoder = Decoder::new(data);
    let pixels = decoder.decode()?;
    let info = decoder
        .info()
        .ok_or_else(|| FrameError::UnsupportedFormat("JPEG without header".into()))?;
    let (width, height) = (u32::from(info.width), u32::from(info.height));

    let rgb = match info.pixel_format {
        JpegPixelFormat::RGB24 => pixels,
        JpegPixelFormat::L8 => pixels.iter().flat_map(|&l| [l, l, l]).collect(),
        JpegPixelFormat::L16 => pixels
            .chunks_exact(2)
            .flat_map(|c| [c[0], c[0], c[0]])
            .collect(),
        JpegPixelFormat::CMYK32 => pixels
            .chunks_exact(4)
            .flat_map(|c| {
                let k = 255 - u16::from(c[3]);
                let channel = |v: u8| ((255 - u16::from(v)) * k / 255) as u8;
                [channel(c[0]), channel(c[1]), channel(c[2])]
            })
            .collect(),
    };
    into_image(width, height, rgb)
}

/// BT.601 YUYV 4:2:2 to RGB
fn yuyv_to_rgb(data: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(data.len() / 2 * 3);
    for chunk in data.chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_pixel(y0, u, v));
        rgb.extend_from_slice(&yuv_pixel(y1, u, v));
    }
    rgb
}

fn yuv_pixel(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clamp = |x: i32| x.clamp(0, 255) as u8;
    [
        clamp((298 * c + 409 * e + 128) >> 8),
        clamp((298 * c - 100 * d - 208 * e + 128) >> 8),
        clamp((298 * c + 516 * d + 128) >> 8),
    ]
}

fn take_exact(data: &[u8], expected: usize) -> Result<&[u8], FrameError> {
    data.get(..expected).ok_or(FrameError::ShortBuffer {
        expected,
        actual: data.len(),
    })
}

fn into_image(width: u32, height: u32, rgb: Vec<u8>) -> Result<RgbImage, FrameError> {
    let actual = rgb.len();
    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::ShortBuffer {
        expected: width as usize * height as usize * 3,
        actual,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgr_is_swapped() {
        let img = decode_bytes(&[1, 2, 3, 4, 5, 6], PixelFormat::Bgr24, 2, 1).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [3, 2, 1]);
        assert_eq!(img.get_pixel(1, 0).0, [6, 5, 4]);
    }

    #[test]
    fn test_yuyv_grey() {
        // Y=126 with neutral chroma decodes to mid grey on both pixels
        let img = decode_bytes(&[126, 128, 126, 128], PixelFormat::Yuyv4, 2, 1).unwrap();
        let [r, g, b] = img.get_pixel(0, 0).0;
        assert_eq!(r, g);
        assert_eq!(g, b);
        assert_eq!(img.get_pixel(0, 0), img.get_pixel(1, 0));
    }

    #[test]
    fn test_short_buffer() {
        let err = decode_bytes(&[0; 5], PixelFormat::Rgb24, 2, 1).unwrap_err();
        assert!(matches!(
            err,
            FrameError::ShortBuffer {
                expected: 6,
                actual: 5
            }
        ));
    }

    #[test]
    fn test_jpeg_roundtrip_dimensions() {
        let source = RgbImage::from_pixel(8, 4, image::Rgb([200, 10, 10]));
        let mut jpeg = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 90)
            .encode_image(&source)
            .unwrap();

        let img = decode_bytes(&jpeg, PixelFormat::Mjpeg, 0, 0).unwrap();
        assert_eq!(img.dimensions(), (8, 4));
    }
}
