//! Extension-based MIME sniffing used when a caller doesn't declare a
//! `Content-Type` and when the blob store or `Populate` has to derive one
//! from a bare filename.

const FALLBACK: &str = "application/octet-stream";

/// Derive a content type from a path's extension. Falls back to
/// `application/octet-stream` for unknown or missing extensions.
pub fn from_extension(path: &str) -> String {
    let ext = path.rsplit('.').next().filter(|e| *e != path).map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html",
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "text/javascript",
        Some("json") => "application/json",
        Some("txt") => "text/plain",
        Some("csv") => "text/csv",
        Some("xml") => "application/xml",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("wasm") => "application/wasm",
        Some("zip") => "application/zip",
        Some("tar") => "application/x-tar",
        Some("gz") => "application/gzip",
        Some("mp4") => "video/mp4",
        Some("mp3") => "audio/mpeg",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        _ => FALLBACK,
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_extensions_map() {
        assert_eq!(from_extension("index.html"), "text/html");
        assert_eq!(from_extension("a/b/app.js"), "text/javascript");
        assert_eq!(from_extension("data.json"), "application/json");
    }

    #[test]
    fn unknown_or_missing_extension_falls_back() {
        assert_eq!(from_extension("README"), FALLBACK);
        assert_eq!(from_extension("archive.tar.unknownext"), FALLBACK);
        assert_eq!(from_extension(""), FALLBACK);
    }
}
