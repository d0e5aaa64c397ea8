//! Input validation helpers for uploads and gallery paths.

/// Maximum decoded image size accepted for restoration uploads.
pub const MAX_IMAGE_BYTES: usize = 12 * 1024 * 1024;

/// Whether a declared content type is an image type.
#[must_use]
pub fn is_image_mime(mime: &str) -> bool {
    mime.starts_with("image/") && mime.len() > "image/".len()
}

/// Decoded byte length of a base64 string, computed without decoding.
///
/// Accepts padded and unpadded input; trailing whitespace is ignored.
#[must_use]
pub fn decoded_base64_len(data: &str) -> usize {
    let data = data.trim_end();
    let padding = data.bytes().rev().take_while(|b| *b == b'=').count();
    data.len().saturating_sub(padding) * 3 / 4
}

/// Whether a gallery filename is safe to serve.
///
/// Allows a single path segment of alphanumerics, `.`, `-`, `_`; rejects
/// dotfiles and anything that could traverse out of the gallery directory.
#[must_use]
pub fn safe_gallery_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

/// Content type for a gallery file, guessed from its extension.
#[must_use]
pub fn gallery_content_type(name: &str) -> &'static str {
    let extension = name.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "avif" => "image/avif",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_mime_requires_image_prefix() {
        assert!(is_image_mime("image/jpeg"));
        assert!(is_image_mime("image/png"));
        assert!(!is_image_mime("image/"));
        assert!(!is_image_mime("text/plain"));
        assert!(!is_image_mime("application/json"));
        assert!(!is_image_mime(""));
    }

    #[test]
    fn decoded_len_padded() {
        // "ABC" -> "QUJD", "AB" -> "QUI=", "A" -> "QQ=="
        assert_eq!(decoded_base64_len("QUJD"), 3);
        assert_eq!(decoded_base64_len("QUI="), 2);
        assert_eq!(decoded_base64_len("QQ=="), 1);
    }

    #[test]
    fn decoded_len_unpadded() {
        assert_eq!(decoded_base64_len("QUI"), 2);
        assert_eq!(decoded_base64_len("QQ"), 1);
        assert_eq!(decoded_base64_len(""), 0);
    }

    #[test]
    fn decoded_len_ignores_trailing_whitespace() {
        assert_eq!(decoded_base64_len("QUJD\n"), 3);
    }

    #[test]
    fn decoded_len_scales() {
        let four_mib_encoded = "A".repeat(4 * 1024 * 1024);
        assert_eq!(decoded_base64_len(&four_mib_encoded), 3 * 1024 * 1024);
    }

    #[test]
    fn gallery_names_accept_plain_files() {
        assert!(safe_gallery_name("before1.jpg"));
        assert!(safe_gallery_name("after12.webp"));
        assert!(safe_gallery_name("photo_2-final.png"));
    }

    #[test]
    fn gallery_names_reject_traversal() {
        assert!(!safe_gallery_name(""));
        assert!(!safe_gallery_name(".."));
        assert!(!safe_gallery_name("../etc/passwd"));
        assert!(!safe_gallery_name("a/b.jpg"));
        assert!(!safe_gallery_name("a\\b.jpg"));
        assert!(!safe_gallery_name(".htaccess"));
    }

    #[test]
    fn content_type_by_extension() {
        assert_eq!(gallery_content_type("x.jpg"), "image/jpeg");
        assert_eq!(gallery_content_type("x.JPEG"), "image/jpeg");
        assert_eq!(gallery_content_type("x.png"), "image/png");
        assert_eq!(gallery_content_type("x.webp"), "image/webp");
        assert_eq!(gallery_content_type("x.bin"), "application/octet-stream");
        assert_eq!(gallery_content_type("noext"), "application/octet-stream");
    }
}
