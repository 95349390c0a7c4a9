//! Frame type and backend byte-stream decoding
//!
//! Every capture backend delivers bytes with its own framing and its own
//! failure modes: the raw screencap stream has a 12-byte header and may
//! carry leading garbage, the swiftcap helper hides its payload behind a
//! vendor preamble and a magic token, and text-oriented shells mangle line
//! endings inside binary output. All of them are decoded here into one
//! canonical [`Frame`].

use crate::error::{DeviceError, Result};
use chrono::{DateTime, Utc};
use image::{imageops, DynamicImage, RgbImage};
use tracing::{debug, warn};

/// Magic token preceding the swiftcap compressed block.
pub const SWIFTCAP_MAGIC: &[u8; 4] = b"SCAP";

/// Banner some Android-in-a-box shells print before binary output.
const SHELL_BANNER: &[u8] = b"long long=8 fun*=10\n";

/// Largest plausible screen edge; headers beyond it are corruption.
const MAX_EDGE: u32 = 16384;

/// A decoded, normalized screen frame.
///
/// Canonical layout is RGB8, row-major, top-left origin. The declared
/// dimensions always match the buffer length; construction fails otherwise.
#[derive(Debug, Clone)]
pub struct Frame {
    image: RgbImage,
    captured_at: DateTime<Utc>,
}

impl Frame {
    /// Build a frame from raw RGB8 bytes. Fails when `data.len()` does not
    /// equal `width * height * 3`.
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let image = RgbImage::from_raw(width, height, data).ok_or_else(|| {
            DeviceError::CaptureCorrupted(format!(
                "buffer length does not match {}x{}x3",
                width, height
            ))
        })?;
        Ok(Self {
            image,
            captured_at: Utc::now(),
        })
    }

    pub fn from_image(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn data(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    /// Mean channel value over a pixel region, clamped to the frame.
    pub fn mean_region(&self, x: u32, y: u32, w: u32, h: u32) -> f64 {
        let x1 = x.min(self.width());
        let y1 = y.min(self.height());
        let x2 = (x + w).min(self.width());
        let y2 = (y + h).min(self.height());
        let mut sum: u64 = 0;
        let mut count: u64 = 0;
        for py in y1..y2 {
            for px in x1..x2 {
                let p = self.image.get_pixel(px, py);
                sum += p.0[0] as u64 + p.0[1] as u64 + p.0[2] as u64;
                count += 3;
            }
        }
        if count == 0 {
            return 0.0;
        }
        sum as f64 / count as f64
    }

    /// Rotate by the device orientation (quarter turns counterclockwise of
    /// the panel relative to natural orientation), producing a new frame.
    pub fn rotated(&self, orientation: u8) -> Result<Frame> {
        let image = match orientation {
            0 => return Ok(self.clone()),
            1 => imageops::rotate270(&self.image),
            2 => imageops::rotate180(&self.image),
            3 => imageops::rotate90(&self.image),
            _ => {
                return Err(DeviceError::Parse(format!(
                    "Invalid device orientation: {}",
                    orientation
                )))
            }
        };
        Ok(Frame {
            image,
            captured_at: self.captured_at,
        })
    }
}

fn header_u32(raw: &[u8], index: usize) -> u32 {
    let base = index * 4;
    u32::from_le_bytes([raw[base], raw[base + 1], raw[base + 2], raw[base + 3]])
}

/// Decode the raw screencap stream: 12-byte header of three little-endian
/// u32 (width, height, format tag), then RGBA pixels.
///
/// Some transports prepend garbage, so exactly the last `w*h*4` bytes are
/// taken as pixel data. A short buffer is corruption, never a partial frame.
pub fn decode_raw_screencap(raw: &[u8]) -> Result<Frame> {
    if raw.len() < 12 {
        return Err(DeviceError::CaptureCorrupted(format!(
            "raw screencap stream too short: {} bytes",
            raw.len()
        )));
    }
    let width = header_u32(raw, 0);
    let height = header_u32(raw, 1);
    let format = header_u32(raw, 2);
    if width == 0 || height == 0 || width > MAX_EDGE || height > MAX_EDGE {
        return Err(DeviceError::CaptureCorrupted(format!(
            "implausible dimensions {}x{} (format {})",
            width, height, format
        )));
    }

    let need = width as usize * height as usize * 4;
    if raw.len() < 12 + need {
        return Err(DeviceError::CaptureCorrupted(format!(
            "expected {} pixel bytes for {}x{}, have {}",
            need,
            width,
            height,
            raw.len().saturating_sub(12)
        )));
    }

    let pixels = &raw[raw.len() - need..];
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for px in pixels.chunks_exact(4) {
        rgb.extend_from_slice(&px[..3]);
    }
    Frame::from_rgb(width, height, rgb)
}

/// Decode a swiftcap stream: `[vendor preamble][magic][zstd block]`, where
/// the block holds an ordinary compressed image.
pub fn decode_swiftcap(raw: &[u8]) -> Result<Frame> {
    let offset = raw
        .windows(SWIFTCAP_MAGIC.len())
        .position(|w| w == SWIFTCAP_MAGIC)
        .ok_or_else(|| {
            DeviceError::CaptureCorrupted(format!(
                "magic token not found in {} bytes",
                raw.len()
            ))
        })?;
    if offset > 0 {
        debug!("swiftcap preamble of {} bytes skipped", offset);
    }
    let block = &raw[offset + SWIFTCAP_MAGIC.len()..];
    let inflated = zstd::stream::decode_all(block)
        .map_err(|e| DeviceError::CaptureCorrupted(format!("inflate failed: {}", e)))?;
    let image = image::load_from_memory(&inflated)
        .map_err(|e| DeviceError::CaptureCorrupted(format!("image decode failed: {}", e)))?;
    Ok(Frame::from_image(image.to_rgb8()))
}

/// Line-ending substitutions tried on text-shell binary output, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepairRule {
    None,
    CrLf,
    CrCrLf,
}

const REPAIR_RULES: [RepairRule; 3] = [RepairRule::None, RepairRule::CrLf, RepairRule::CrCrLf];

fn replace_bytes(data: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i..].starts_with(from) {
            out.extend_from_slice(to);
            i += from.len();
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}

fn apply_rule(data: &[u8], rule: RepairRule) -> Vec<u8> {
    let repaired = match rule {
        RepairRule::None => data.to_vec(),
        RepairRule::CrLf => replace_bytes(data, b"\r\n", b"\n"),
        RepairRule::CrCrLf => replace_bytes(data, b"\r\r\n", b"\n"),
    };
    if repaired.starts_with(SHELL_BANNER) {
        repaired[SHELL_BANNER.len()..].to_vec()
    } else {
        repaired
    }
}

/// Decoder for compressed images arriving over a text-oriented shell.
///
/// Such transports duplicate or insert carriage returns inside binary
/// payloads. Each known substitution is tried until one yields a
/// structurally valid image; the rule that worked is remembered and tried
/// first on the next frame.
#[derive(Debug, Default)]
pub struct ShellImageDecoder {
    preferred: Option<usize>,
}

impl ShellImageDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn try_rule(&self, raw: &[u8], rule: RepairRule) -> Result<Frame> {
        let candidate = apply_rule(raw, rule);
        let image = image::load_from_memory(&candidate)?;
        Ok(Frame::from_image(to_rgb(image)))
    }

    pub fn decode(&mut self, raw: &[u8]) -> Result<Frame> {
        if raw.len() < 500 {
            warn!("Unexpected screenshot: {} bytes", raw.len());
        }
        let mut order: Vec<usize> = Vec::with_capacity(REPAIR_RULES.len());
        if let Some(p) = self.preferred {
            order.push(p);
        }
        order.extend((0..REPAIR_RULES.len()).filter(|i| Some(*i) != self.preferred));

        for index in order {
            match self.try_rule(raw, REPAIR_RULES[index]) {
                Ok(frame) => {
                    self.preferred = Some(index);
                    return Ok(frame);
                }
                Err(_) => continue,
            }
        }
        self.preferred = None;
        Err(DeviceError::CaptureCorrupted(
            "no line-ending correction yields a valid image".to_string(),
        ))
    }
}

fn to_rgb(image: DynamicImage) -> RgbImage {
    image.to_rgb8()
}

/// Build a frame from the vendor shared-memory layout: BGRA pixels with a
/// bottom-left origin.
pub fn frame_from_bgra_flipped(width: u32, height: u32, pixels: &[u8]) -> Result<Frame> {
    let need = width as usize * height as usize * 4;
    if pixels.len() < need {
        return Err(DeviceError::CaptureCorrupted(format!(
            "shared-memory buffer holds {} bytes, {} needed",
            pixels.len(),
            need
        )));
    }
    let row_len = width as usize * 4;
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    for y in (0..height as usize).rev() {
        let row = &pixels[y * row_len..(y + 1) * row_len];
        for px in row.chunks_exact(4) {
            // BGRA -> RGB
            rgb.push(px[2]);
            rgb.push(px[1]);
            rgb.push(px[0]);
        }
    }
    Frame::from_rgb(width, height, rgb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::Cursor;

    fn raw_stream(width: u32, height: u32, garbage: usize) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&width.to_le_bytes());
        data.extend_from_slice(&height.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend(std::iter::repeat(0xAA).take(garbage));
        for i in 0..(width * height) {
            data.extend_from_slice(&[(i % 251) as u8, 0x10, 0x20, 0xFF]);
        }
        data
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([120, 30, 200]));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn raw_exact_payload_decodes() {
        let frame = decode_raw_screencap(&raw_stream(1280, 720, 0)).unwrap();
        assert_eq!((frame.width(), frame.height()), (1280, 720));
        assert_eq!(frame.data().len(), 1280 * 720 * 3);
    }

    #[test]
    fn raw_leading_garbage_is_sliced_off() {
        let frame = decode_raw_screencap(&raw_stream(64, 32, 100)).unwrap();
        assert_eq!((frame.width(), frame.height()), (64, 32));
        // First pixel survives slicing from the tail
        assert_eq!(&frame.data()[..3], &[0, 0x10, 0x20]);
    }

    #[test]
    fn raw_short_payload_is_corruption() {
        let mut data = raw_stream(64, 32, 0);
        data.truncate(data.len() - 1);
        assert!(matches!(
            decode_raw_screencap(&data),
            Err(DeviceError::CaptureCorrupted(_))
        ));
    }

    #[test]
    fn raw_empty_and_header_only_are_corruption() {
        assert!(decode_raw_screencap(&[]).is_err());
        assert!(decode_raw_screencap(&raw_stream(64, 32, 0)[..12]).is_err());
    }

    #[test]
    fn raw_implausible_header_is_corruption() {
        let mut data = vec![0u8; 64];
        data[..4].copy_from_slice(&0u32.to_le_bytes());
        assert!(decode_raw_screencap(&data).is_err());
    }

    #[test]
    fn swiftcap_magic_at_various_offsets() {
        let inner = png_bytes(16, 8);
        let block = zstd::stream::encode_all(Cursor::new(&inner), 0).unwrap();
        for preamble in [0usize, 1, 500] {
            let mut stream = vec![0x55; preamble];
            stream.extend_from_slice(SWIFTCAP_MAGIC);
            stream.extend_from_slice(&block);
            let frame = decode_swiftcap(&stream).unwrap();
            assert_eq!((frame.width(), frame.height()), (16, 8));
        }
    }

    #[test]
    fn swiftcap_missing_magic_is_corruption() {
        let stream = vec![0x55u8; 600];
        assert!(matches!(
            decode_swiftcap(&stream),
            Err(DeviceError::CaptureCorrupted(_))
        ));
    }

    #[test]
    fn swiftcap_bad_block_is_corruption() {
        let mut stream = SWIFTCAP_MAGIC.to_vec();
        stream.extend_from_slice(b"definitely not zstd");
        assert!(decode_swiftcap(&stream).is_err());
    }

    #[test]
    fn shell_decoder_handles_clean_png() {
        let mut dec = ShellImageDecoder::new();
        let frame = dec.decode(&png_bytes(16, 8)).unwrap();
        assert_eq!((frame.width(), frame.height()), (16, 8));
    }

    #[test]
    fn shell_decoder_repairs_crlf_mangling() {
        let mangled = replace_bytes(&png_bytes(16, 8), b"\n", b"\r\n");
        let mut dec = ShellImageDecoder::new();
        let frame = dec.decode(&mangled).unwrap();
        assert_eq!((frame.width(), frame.height()), (16, 8));
        // The successful rule is preferred on the next frame
        assert_eq!(dec.preferred, Some(1));
    }

    #[test]
    fn shell_decoder_repairs_double_cr_mangling() {
        let mangled = replace_bytes(&png_bytes(16, 8), b"\n", b"\r\r\n");
        let mut dec = ShellImageDecoder::new();
        assert!(dec.decode(&mangled).is_ok());
        assert_eq!(dec.preferred, Some(2));
    }

    #[test]
    fn shell_decoder_strips_banner() {
        let mut data = SHELL_BANNER.to_vec();
        data.extend_from_slice(&png_bytes(16, 8));
        let mut dec = ShellImageDecoder::new();
        assert!(dec.decode(&data).is_ok());
    }

    #[test]
    fn shell_decoder_rejects_garbage() {
        let mut dec = ShellImageDecoder::new();
        assert!(matches!(
            dec.decode(&[0u8; 700]),
            Err(DeviceError::CaptureCorrupted(_))
        ));
    }

    #[test]
    fn bgra_flip_reorders_channels_and_rows() {
        // 1x2 image: bottom row red, top row blue in BGRA
        let pixels = vec![
            255, 0, 0, 255, // bottom-left, blue in BGRA
            0, 0, 255, 255, // top-left, red in BGRA
        ];
        let frame = frame_from_bgra_flipped(1, 2, &pixels).unwrap();
        // After the flip, row 0 is the top row: red
        assert_eq!(&frame.data()[..3], &[255, 0, 0]);
        assert_eq!(&frame.data()[3..6], &[0, 0, 255]);
    }

    #[test]
    fn rotation_swaps_dimensions() {
        let frame = Frame::from_rgb(4, 2, vec![0; 4 * 2 * 3]).unwrap();
        let rotated = frame.rotated(1).unwrap();
        assert_eq!((rotated.width(), rotated.height()), (2, 4));
        assert_eq!((frame.rotated(2).unwrap().width()), 4);
        assert!(frame.rotated(7).is_err());
    }

    #[test]
    fn mean_region_detects_black() {
        let frame = Frame::from_rgb(8, 8, vec![0; 8 * 8 * 3]).unwrap();
        assert!(frame.mean_region(0, 0, 8, 8) < 1.0);
        let frame = Frame::from_rgb(8, 8, vec![200; 8 * 8 * 3]).unwrap();
        assert!(frame.mean_region(0, 0, 8, 8) > 1.0);
    }

    #[test]
    fn frame_saves_as_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let frame = Frame::from_rgb(16, 8, vec![90; 16 * 8 * 3]).unwrap();
        frame.image().save(&path).unwrap();
        let reloaded = image::open(&path).unwrap();
        assert_eq!((reloaded.width(), reloaded.height()), (16, 8));
    }

    #[test]
    fn frame_dimension_invariant() {
        assert!(Frame::from_rgb(10, 10, vec![0; 299]).is_err());
        assert!(Frame::from_rgb(10, 10, vec![0; 300]).is_ok());
    }
}
