//! MIME type detection module
//!
//! Returns the Content-Type for a file path based on its extension. Text,
//! script and JSON types carry an explicit UTF-8 charset.

use std::path::Path;

const CHARSET_SUFFIX: &str = "; charset=UTF-8";

/// Get the bare MIME type for a lowercase file extension
///
/// # Examples
/// ```
/// use serve_files::http::mime::mime_type;
/// assert_eq!(mime_type(Some("mp4")), "video/mp4");
/// assert_eq!(mime_type(None), "application/octet-stream");
/// ```
pub fn mime_type(extension: Option<&str>) -> &'static str {
    match extension {
        // Text
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("txt" | "md") => "text/plain",
        Some("csv") => "text/csv",
        Some("xml") => "application/xml",
        Some("xslt") => "application/xslt+xml",

        // JavaScript/WASM
        Some("js" | "mjs") => "application/javascript",
        Some("json" | "map") => "application/json",
        Some("wasm") => "application/wasm",

        // Images
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg" | "svgz") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("webp") => "image/webp",

        // Video
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("ogg" | "ogv") => "video/ogg",
        Some("mov") => "video/quicktime",
        Some("avi") => "video/x-msvideo",

        // Audio
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",
        Some("m4a") => "audio/mp4",

        // Fonts
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("otf") => "font/otf",
        Some("eot") => "application/vnd.ms-fontobject",

        // Documents
        Some("pdf") => "application/pdf",
        Some("zip") => "application/zip",
        Some("gz" | "gzip") => "application/gzip",
        Some("tar") => "application/x-tar",

        // Default
        _ => "application/octet-stream",
    }
}

fn wants_charset(mime: &str) -> bool {
    mime.starts_with("text/") || mime == "application/javascript" || mime == "application/json"
}

/// Content-Type header value for a file path
///
/// # Examples
/// ```
/// use serve_files::http::mime::content_type;
/// assert_eq!(content_type("site/index.HTML".as_ref()), "text/html; charset=UTF-8");
/// assert_eq!(content_type("photo.png".as_ref()), "image/png");
/// ```
pub fn content_type(path: &Path) -> String {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    let mime = mime_type(extension.as_deref());

    if wants_charset(mime) {
        format!("{mime}{CHARSET_SUFFIX}")
    } else {
        mime.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_types() {
        assert_eq!(mime_type(Some("css")), "text/css");
        assert_eq!(mime_type(Some("js")), "application/javascript");
        assert_eq!(mime_type(Some("png")), "image/png");
        assert_eq!(mime_type(Some("mp4")), "video/mp4");
    }

    #[test]
    fn test_unknown_extension() {
        assert_eq!(mime_type(Some("xyz")), "application/octet-stream");
        assert_eq!(content_type(Path::new("Makefile")), "application/octet-stream");
    }

    #[test]
    fn test_charset_appended() {
        assert_eq!(content_type(Path::new("a.txt")), "text/plain; charset=UTF-8");
        assert_eq!(
            content_type(Path::new("app.js")),
            "application/javascript; charset=UTF-8"
        );
        assert_eq!(
            content_type(Path::new("data.json")),
            "application/json; charset=UTF-8"
        );
        assert_eq!(content_type(Path::new("feed.xml")), "application/xml");
    }

    #[test]
    fn test_extension_case_insensitive() {
        assert_eq!(content_type(Path::new("IMG.JPG")), "image/jpeg");
    }
}
