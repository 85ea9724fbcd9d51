// Extension -> MIME type table, consumed by the object-store backend (for
// the Content-Type it uploads with) and by an external HTTP layer's
// response headers.

const TABLE: &[(&str, &str)] = &[
    ("txt", "text/plain"),
    ("html", "text/html"),
    ("htm", "text/html"),
    ("css", "text/css"),
    ("js", "text/javascript"),
    ("json", "application/json"),
    ("xml", "application/xml"),
    ("csv", "text/csv"),
    ("md", "text/markdown"),
    ("png", "image/png"),
    ("jpg", "image/jpeg"),
    ("jpeg", "image/jpeg"),
    ("gif", "image/gif"),
    ("svg", "image/svg+xml"),
    ("webp", "image/webp"),
    ("ico", "image/x-icon"),
    ("pdf", "application/pdf"),
    ("zip", "application/zip"),
    ("gz", "application/gzip"),
    ("tar", "application/x-tar"),
    ("mp4", "video/mp4"),
    ("mp3", "audio/mpeg"),
    ("wav", "audio/wav"),
    ("wasm", "application/wasm"),
    ("bin", "application/octet-stream"),
];

/// Infers a MIME type from a file extension (case-insensitive, without the
/// leading dot). Unknown extensions produce `application/octet-stream`.
pub fn content_type_for_extension(extension: &str) -> &'static str {
    let lower = extension.to_ascii_lowercase();
    TABLE
        .iter()
        .find(|(ext, _)| *ext == lower)
        .map(|(_, mime)| *mime)
        .unwrap_or("application/octet-stream")
}
