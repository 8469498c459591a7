//! Image signature sniffing and human-readable sizes.
//!
//! The structural scan labels images from the PDF `/Filter` entry alone;
//! [`sniff_format`] is an independent check on the payload's leading bytes
//! for callers that want one.

use crate::report::ImageFormat;
use serde::{Deserialize, Serialize};

/// Fewest bytes a payload needs before its signature is trusted.
const MIN_SIGNATURE_LEN: usize = 8;

/// Short prefixes accepted even when the rest of the signature is damaged.
const PNG_PREFIX: &[u8] = &[0x89, b'P', b'N', b'G'];
const GIF_PREFIX: &[u8] = b"GIF";

/// Result of [`sniff_format`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SniffResult {
    pub valid: bool,
    pub format: Option<ImageFormat>,
}

/// Identify a payload from its magic bytes.
///
/// Payloads shorter than eight bytes are invalid. JPEG, PNG and GIF
/// signatures are recognised; any other signature is reported as JPEG.
pub fn sniff_format(bytes: &[u8]) -> SniffResult {
    if bytes.len() < MIN_SIGNATURE_LEN {
        return SniffResult {
            valid: false,
            format: None,
        };
    }
    let format = match image::guess_format(bytes) {
        Ok(image::ImageFormat::Png) => ImageFormat::Png,
        Ok(image::ImageFormat::Gif) => ImageFormat::Gif,
        _ if bytes.starts_with(PNG_PREFIX) => ImageFormat::Png,
        _ if bytes.starts_with(GIF_PREFIX) => ImageFormat::Gif,
        _ => ImageFormat::Jpeg,
    };
    SniffResult {
        valid: true,
        format: Some(format),
    }
}

/// Render a byte count with binary units, e.g. `1.5 KB`.
pub fn format_bytes(n: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if n == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = n as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rendered = format!("{value:.2}");
    let rendered = rendered.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", rendered, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_payload_is_invalid() {
        assert_eq!(
            sniff_format(&[0xFF, 0xD8, 0xFF]),
            SniffResult {
                valid: false,
                format: None
            }
        );
    }

    #[test]
    fn known_signatures() {
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        assert_eq!(sniff_format(&png).format, Some(ImageFormat::Png));

        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 0, 0x10, b'J', b'F', b'I', b'F'];
        assert_eq!(sniff_format(&jpeg).format, Some(ImageFormat::Jpeg));

        assert_eq!(sniff_format(b"GIF89a\x01\x00\x01\x00").format, Some(ImageFormat::Gif));
    }

    #[test]
    fn truncated_signatures_still_match() {
        let png = [0x89, b'P', b'N', b'G', 0, 0, 0, 0];
        assert_eq!(sniff_format(&png).format, Some(ImageFormat::Png));

        let gif = [b'G', b'I', b'F', b'0', b'0', 0, 0, 0];
        assert_eq!(sniff_format(&gif).format, Some(ImageFormat::Gif));
    }

    #[test]
    fn unknown_signature_defaults_to_jpeg() {
        let r = sniff_format(b"\x00\x01\x02\x03\x04\x05\x06\x07\x08");
        assert!(r.valid);
        assert_eq!(r.format, Some(ImageFormat::Jpeg));
    }

    #[test]
    fn byte_formatting() {
        assert_eq!(format_bytes(0), "0 Bytes");
        assert_eq!(format_bytes(500), "500 Bytes");
        assert_eq!(format_bytes(1024), "1 KB");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(6000), "5.86 KB");
        assert_eq!(format_bytes(10 * 1024 * 1024), "10 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3 GB");
    }
}
