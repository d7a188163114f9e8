//! Image magic-byte sniffing
//!
//! A cached file only counts as a valid entry when its leading bytes match one
//! of the recognised image signatures.

/// Number of leading bytes needed to recognise any supported format
pub const SNIFF_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Webp,
}

impl ImageFormat {
    /// Recognise an image format from its first bytes
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0xFF, 0xD8, ..] => Some(ImageFormat::Jpeg),
            [0x89, b'P', ..] => Some(ImageFormat::Png),
            [b'G', b'I', ..] => Some(ImageFormat::Gif),
            [b'R', b'I', ..] => Some(ImageFormat::Webp),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
            ImageFormat::Gif => "image/gif",
            ImageFormat::Webp => "image/webp",
        }
    }
}
