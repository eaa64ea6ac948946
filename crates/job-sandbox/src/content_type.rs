//! Best-guess content types for served files.

use std::path::Path;

pub const OCTET_STREAM: &str = "application/octet-stream";

/// Guess from the file extension first, then from leading magic bytes.
pub fn guess(path: &Path, head: &[u8]) -> String {
    if let Some(mime) = mime_guess::from_path(path).first() {
        return mime.essence_str().to_string();
    }
    if let Some(kind) = infer::get(head) {
        return kind.mime_type().to_string();
    }
    OCTET_STREAM.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_wins() {
        assert_eq!(guess(Path::new("a/b.png"), b""), "image/png");
        assert_eq!(guess(Path::new("notes.txt"), b""), "text/plain");
    }

    #[test]
    fn test_magic_bytes_fallback() {
        let png_header = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(guess(Path::new("image.noext"), &png_header), "image/png");
    }

    #[test]
    fn test_unknown_is_octet_stream() {
        assert_eq!(guess(Path::new("archive.rpyc"), b"\x00\x01"), OCTET_STREAM);
    }
}
