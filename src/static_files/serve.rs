//! Static file responses: whole files, large streams and byte ranges.

use std::io::SeekFrom;
use std::path::Path;

use axum::body::Body;
use axum::http::header::{ACCEPT_RANGES, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE};
use axum::http::{HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::static_files::mime::is_media;

/// Non-media files above this size stream without the cache.
pub const STREAM_THRESHOLD: u64 = 10 * 1024 * 1024;

/// How a resolved file is delivered.
pub enum StaticReply {
    /// Complete body, eligible for the response cache.
    Whole {
        content_type: &'static str,
        body: Bytes,
    },
    /// Already-built streaming response; bypasses the cache.
    Stream(Response),
}

/// An inclusive byte window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

/// Parse `bytes=start-[end]` against a file size. Of a multi-range header
/// only the first range is served.
///
/// `None` means the range is malformed or unsatisfiable (416).
pub fn parse_range(header: &str, size: u64) -> Option<ByteRange> {
    let spec = header.trim().strip_prefix("bytes=")?;
    let first = spec.split(',').next().unwrap_or_default().trim();
    let (start, end) = first.split_once('-')?;
    if start.is_empty() || !start.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let start: u64 = start.parse().ok()?;
    let last = size.checked_sub(1)?;
    let end = match end.trim() {
        "" => last,
        digits if digits.bytes().all(|b| b.is_ascii_digit()) => digits.parse::<u64>().ok()?.min(last),
        _ => return None,
    };
    if start >= size || start > end {
        return None;
    }
    Some(ByteRange { start, end })
}

fn status_only(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

fn stream_response(status: StatusCode, body: Body, headers: &[(axum::http::HeaderName, String)]) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    for (name, value) in headers {
        if let Ok(value) = HeaderValue::from_str(value) {
            response.headers_mut().insert(name.clone(), value);
        }
    }
    response
}

async fn serve_media(path: &Path, content_type: &'static str, size: u64, range: Option<&str>) -> std::io::Result<Response> {
    let Some(range) = range else {
        let file = tokio::fs::File::open(path).await?;
        return Ok(stream_response(
            StatusCode::OK,
            Body::from_stream(ReaderStream::new(file)),
            &[
                (CONTENT_TYPE, content_type.to_string()),
                (CONTENT_LENGTH, size.to_string()),
                (ACCEPT_RANGES, "bytes".to_string()),
            ],
        ));
    };

    let Some(ByteRange { start, end }) = parse_range(range, size) else {
        return Ok(status_only(StatusCode::RANGE_NOT_SATISFIABLE));
    };

    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(start)).await?;
    let length = end - start + 1;
    Ok(stream_response(
        StatusCode::PARTIAL_CONTENT,
        Body::from_stream(ReaderStream::new(file.take(length))),
        &[
            (CONTENT_RANGE, format!("bytes {}-{}/{}", start, end, size)),
            (ACCEPT_RANGES, "bytes".to_string()),
            (CONTENT_LENGTH, length.to_string()),
            (CONTENT_TYPE, content_type.to_string()),
        ],
    ))
}

/// Deliver a resolved file. The body stream owns the file handle, so a
/// client disconnect closes it.
pub async fn serve(path: &Path, content_type: &'static str, size: u64, range: Option<&str>) -> std::io::Result<StaticReply> {
    if is_media(content_type) {
        return serve_media(path, content_type, size, range).await.map(StaticReply::Stream);
    }

    if size > STREAM_THRESHOLD {
        let file = tokio::fs::File::open(path).await?;
        return Ok(StaticReply::Stream(stream_response(
            StatusCode::OK,
            Body::from_stream(ReaderStream::new(file)),
            &[(CONTENT_TYPE, content_type.to_string())],
        )));
    }

    let body = tokio::fs::read(path).await?;
    Ok(StaticReply::Whole {
        content_type,
        body: Bytes::from(body),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_range("bytes=0-99", 1000), Some(ByteRange { start: 0, end: 99 }));
        assert_eq!(parse_range("bytes=900-", 1000), Some(ByteRange { start: 900, end: 999 }));
        assert_eq!(parse_range("bytes=990-5000", 1000), Some(ByteRange { start: 990, end: 999 }));
        assert_eq!(parse_range("bytes=1000-", 1000), None);
        assert_eq!(parse_range("bytes=50-10", 1000), None);
        assert_eq!(parse_range("bytes=-500", 1000), None);
        assert_eq!(parse_range("items=0-1", 1000), None);
        assert_eq!(parse_range("bytes=0-1", 0), None);
        assert_eq!(parse_range("bytes=0-99,200-300", 1000), Some(ByteRange { start: 0, end: 99 }));
        assert_eq!(parse_range("bytes=5000-6000, 0-10", 1000), None);
    }

    #[tokio::test]
    async fn test_media_range_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        std::fs::write(&path, &data).unwrap();

        let StaticReply::Stream(response) = serve(&path, "video/mp4", 1000, Some("bytes=100-199")).await.unwrap() else {
            panic!("media must stream");
        };
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes 100-199/1000");
        assert_eq!(response.headers()[CONTENT_LENGTH], "100");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], &data[100..200]);
    }

    #[tokio::test]
    async fn test_media_full_and_unsatisfiable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.mp3");
        std::fs::write(&path, vec![1u8; 64]).unwrap();

        let StaticReply::Stream(full) = serve(&path, "audio/mpeg", 64, None).await.unwrap() else {
            panic!("media must stream");
        };
        assert_eq!(full.status(), StatusCode::OK);
        assert_eq!(full.headers()[ACCEPT_RANGES], "bytes");
        assert_eq!(full.headers()[CONTENT_LENGTH], "64");

        let StaticReply::Stream(bad) = serve(&path, "audio/mpeg", 64, Some("bytes=64-")).await.unwrap() else {
            panic!("media must stream");
        };
        assert_eq!(bad.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    }

    #[tokio::test]
    async fn test_small_file_is_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.css");
        std::fs::write(&path, "body{}").unwrap();
        match serve(&path, "text/css", 6, Some("bytes=0-1")).await.unwrap() {
            StaticReply::Whole { content_type, body } => {
                assert_eq!(content_type, "text/css");
                assert_eq!(&body[..], b"body{}");
            }
            StaticReply::Stream(_) => panic!("small files are buffered"),
        }
    }
}
