use sha2::{Digest, Sha256};

/// The cache key of a source URL, the lowercase hex SHA-256 of the URL string.
pub fn fingerprint(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.as_bytes()))
}

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1A, b'\n'];

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
/// The image formats a worker is willing to serve.
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    /// Classifies a payload by its leading magic bytes.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.starts_with(&[0xFF, 0xD8]) {
            Some(ImageFormat::Jpeg)
        } else if data.starts_with(&PNG_SIGNATURE) {
            Some(ImageFormat::Png)
        } else {
            None
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Png => "image/png",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let url = "https://example.com/a.png";
        assert_eq!(fingerprint(url), fingerprint(url));
        assert_ne!(fingerprint(url), fingerprint("https://example.com/b.png"));
    }

    #[test]
    fn test_fingerprint_known_value() {
        assert_eq!(
            fingerprint(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        );
        assert_eq!(fingerprint("https://example.com/a.png").len(), 64);
    }

    #[test]
    fn test_detect() {
        assert_eq!(ImageFormat::detect(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::detect(&PNG_SIGNATURE), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::detect(b"GIF89a"), None);
        assert_eq!(ImageFormat::detect(&[0xFF]), None);
        assert_eq!(ImageFormat::detect(&PNG_SIGNATURE[..7]), None);
        assert_eq!(ImageFormat::detect(&[]), None);
    }

    #[test]
    fn test_content_type() {
        assert_eq!(ImageFormat::Jpeg.content_type(), "image/jpeg");
        assert_eq!(ImageFormat::Png.content_type(), "image/png");
    }
}
