//! Extension → content type table.

/// Content type for a file extension (without the dot), case-insensitive.
pub fn content_type(ext: &str) -> Option<&'static str> {
    let ct = match ext.to_ascii_lowercase().as_str() {
        "js" => "application/javascript",
        "html" => "text/html; charset=UTF-8",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "ico" => "image/x-icon",
        "png" => "image/png",
        "css" => "text/css",
        "ttf" => "font/ttf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "eot" => "application/vnd.ms-fontobject",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        "ogg" => "video/ogg",
        "mkv" => "video/x-matroska",
        "flv" => "video/x-flv",
        "mp3" => "audio/mpeg",
        "wav" => "audio/x-wav",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        _ => return None,
    };
    Some(ct)
}

/// `video/*` and `audio/*` are served with byte ranges.
pub fn is_media(content_type: &str) -> bool {
    content_type.starts_with("video/") || content_type.starts_with("audio/")
}
