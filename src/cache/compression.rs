//! Gzip for cached text bodies.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

/// Bodies at or below this size are stored as-is.
pub const MIN_COMPRESS_BYTES: usize = 1024;

/// Whether a content type is worth compressing.
pub fn is_compressible(content_type: &str) -> bool {
    ["json", "text", "javascript", "svg", "xml"]
        .iter()
        .any(|marker| content_type.contains(marker))
}

pub fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Compress when the type qualifies, the body is large enough and the result is strictly smaller.
pub fn maybe_gzip(content_type: &str, body: &[u8]) -> Option<Vec<u8>> {
    if !is_compressible(content_type) || body.len() <= MIN_COMPRESS_BYTES {
        return None;
    }
    match gzip(body) {
        Ok(compressed) if compressed.len() < body.len() => Some(compressed),
        Ok(_) => None,
        Err(e) => {
            tracing::error!(error = %e, "Gzip error");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_compressible_types() {
        assert!(is_compressible("application/json"));
        assert!(is_compressible("text/html; charset=UTF-8"));
        assert!(is_compressible("image/svg+xml"));
        assert!(!is_compressible("image/png"));
    }

    #[test]
    fn test_maybe_gzip_thresholds() {
        let small = vec![b'a'; MIN_COMPRESS_BYTES];
        assert!(maybe_gzip("text/plain", &small).is_none());

        let large = vec![b'a'; MIN_COMPRESS_BYTES * 4];
        let compressed = maybe_gzip("text/plain", &large).unwrap();
        assert!(compressed.len() < large.len());

        let mut decoded = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, large);

        assert!(maybe_gzip("image/png", &large).is_none());
    }
}
