use anyhow::{anyhow, Context};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use image::imageops::FilterType;
use image::RgbImage;

/// Pixel bounds of the Qwen2-VL processor (256 and 512 patches of 28x28).
pub const DEFAULT_MIN_PIXELS: u64 = 256 * 28 * 28;
pub const DEFAULT_MAX_PIXELS: u64 = 512 * 28 * 28;

const LENIENT_B64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelBounds {
    pub min_pixels: u64,
    pub max_pixels: u64,
}

impl Default for PixelBounds {
    fn default() -> Self {
        Self {
            min_pixels: DEFAULT_MIN_PIXELS,
            max_pixels: DEFAULT_MAX_PIXELS,
        }
    }
}

/// Decoded RGB8 image, row-major, 3 bytes per pixel.
#[derive(Clone, Debug)]
pub struct SceneImage {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl SceneImage {
    pub fn from_rgb(img: RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            rgb: img.into_raw(),
        }
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Decodes a base64 payload (raw or data URL) into an RGB image scaled into `bounds`.
pub fn decode_base64_image(data: &str, bounds: PixelBounds) -> anyhow::Result<SceneImage> {
    decode_inner(data, bounds).map_err(|e| anyhow!("이미지 처리 실패: {e:#}"))
}

fn decode_inner(data: &str, bounds: PixelBounds) -> anyhow::Result<SceneImage> {
    let payload = match data.split_once(',') {
        Some((_, rest)) => rest.split(',').next().unwrap_or(rest),
        None => data,
    };
    let payload: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    if payload.is_empty() {
        return Err(anyhow!("empty image payload"));
    }
    let bytes = LENIENT_B64.decode(payload.as_bytes()).context("base64 decode")?;
    let img = image::load_from_memory(&bytes).context("decode image")?;
    let rgb = img.to_rgb8();
    Ok(SceneImage::from_rgb(fit_pixels(rgb, bounds)))
}

fn fit_pixels(img: RgbImage, bounds: PixelBounds) -> RgbImage {
    let (w, h) = img.dimensions();
    let pixels = w as u64 * h as u64;
    let target = if pixels > bounds.max_pixels {
        bounds.max_pixels
    } else if pixels < bounds.min_pixels {
        bounds.min_pixels
    } else {
        return img;
    };
    let (nw, nh) = scaled_dims(w, h, target, bounds.max_pixels);
    if (nw, nh) == (w, h) {
        return img;
    }
    image::imageops::resize(&img, nw, nh, FilterType::Triangle)
}

/// Dimensions with the same aspect ratio and about `target_pixels` pixels, never
/// above `max_pixels`. Shrinking floors and growing ceils each side.
fn scaled_dims(w: u32, h: u32, target_pixels: u64, max_pixels: u64) -> (u32, u32) {
    let pixels = w as f64 * h as f64;
    if pixels <= 0.0 {
        return (w.max(1), h.max(1));
    }
    let scale = (target_pixels as f64 / pixels).sqrt();
    let (sw, sh) = (w as f64 * scale, h as f64 * scale);
    let (mut nw, mut nh) = if scale < 1.0 {
        (sw.floor() as u32, sh.floor() as u32)
    } else {
        (sw.ceil() as u32, sh.ceil() as u32)
    };
    nw = nw.max(1);
    nh = nh.max(1);
    while nw as u64 * nh as u64 > max_pixels && (nw > 1 || nh > 1) {
        if nw >= nh {
            nw -= 1;
        } else {
            nh -= 1;
        }
    }
    (nw, nh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use std::io::Cursor;

    fn png_base64(w: u32, h: u32) -> String {
        let img = RgbImage::from_pixel(w, h, image::Rgb([30, 120, 200]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .expect("encode png");
        STANDARD.encode(&buf)
    }

    #[test]
    fn decodes_raw_and_data_url() {
        let bounds = PixelBounds {
            min_pixels: 1,
            max_pixels: 1_000_000,
        };
        let raw = png_base64(8, 6);
        let a = decode_base64_image(&raw, bounds).expect("raw");
        assert_eq!((a.width, a.height), (8, 6));
        assert_eq!(a.rgb.len(), 8 * 6 * 3);
        assert_eq!(&a.rgb[..3], &[30, 120, 200]);

        let url = format!("data:image/png;base64,{raw}");
        let b = decode_base64_image(&url, bounds).expect("data url");
        assert_eq!((b.width, b.height), (8, 6));
    }

    #[test]
    fn large_images_are_scaled_down_keeping_aspect() {
        let bounds = PixelBounds {
            min_pixels: 1,
            max_pixels: 100,
        };
        let img = decode_base64_image(&png_base64(40, 10), bounds).expect("decode");
        assert_eq!((img.width, img.height), (20, 5));
        assert!(img.pixels() <= 100);
    }

    #[test]
    fn default_bounds_are_never_exceeded() {
        let bounds = PixelBounds::default();
        for (w, h) in [(1000, 1000), (1200, 900), (333, 1201)] {
            let img = decode_base64_image(&png_base64(w, h), bounds).expect("decode");
            assert!(
                img.pixels() <= bounds.max_pixels,
                "{w}x{h} -> {}x{}",
                img.width,
                img.height
            );
            assert!(img.pixels() >= bounds.min_pixels);
        }
        assert_eq!(scaled_dims(1000, 1000, DEFAULT_MAX_PIXELS, DEFAULT_MAX_PIXELS), (633, 633));
    }

    #[test]
    fn growing_stays_under_max() {
        // 3x3 grown toward 10 pixels would ceil to 4x4.
        assert_eq!(scaled_dims(3, 3, 10, 10), (3, 3));
        assert_eq!(scaled_dims(2, 2, 64, 1000), (8, 8));
    }

    #[test]
    fn small_images_are_scaled_up() {
        let bounds = PixelBounds {
            min_pixels: 64,
            max_pixels: 1000,
        };
        let img = decode_base64_image(&png_base64(2, 2), bounds).expect("decode");
        assert_eq!((img.width, img.height), (8, 8));
    }

    #[test]
    fn garbage_reports_korean_prefix() {
        let err = decode_base64_image("not-an-image!!", PixelBounds::default()).unwrap_err();
        assert!(err.to_string().starts_with("이미지 처리 실패: "));

        let not_image = STANDARD.encode(b"plain text, not pixels");
        let err = decode_base64_image(&not_image, PixelBounds::default()).unwrap_err();
        assert!(err.to_string().contains("decode image"));
    }
}
