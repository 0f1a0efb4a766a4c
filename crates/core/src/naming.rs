//! Naming conventions for identifiers, export filenames and image formats.
//!
//! Export filenames follow `<poseName>-<itemId>-variation-<index+1>.<ext>`,
//! deterministic for a given collection.

use image::ImageFormat;

use crate::error::CoreError;

/// Characters reserved by the storage key convention.
const RESERVED_KEY_CHARS: &[char] = &[':', '/', '\\'];

/// Extension used when an image's format cannot be detected.
pub const DEFAULT_IMAGE_EXTENSION: &str = "png";

/// MIME type used when an image's format cannot be detected.
pub const DEFAULT_IMAGE_MIME: &str = "image/png";

// ---------------------------------------------------------------------------
// Key segments
// ---------------------------------------------------------------------------

/// Validate that `value` can be embedded in a storage key.
///
/// Owner, model and pose ids become key segments, so they must be non-empty
/// and free of the separators used by the key convention.
pub fn validate_key_segment(kind: &str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!("{kind} must not be empty")));
    }
    if let Some(c) = value.chars().find(|c| RESERVED_KEY_CHARS.contains(c) || c.is_whitespace()) {
        return Err(CoreError::Validation(format!(
            "{kind} '{value}' contains reserved character {c:?}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Export filenames
// ---------------------------------------------------------------------------

/// Lowercase a display name and join its words with `_`.
///
/// Characters outside `[a-z0-9_]` are dropped so the result is safe inside an
/// archive on every platform.
pub fn slugify(name: &str) -> String {
    name.split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
                .collect::<String>()
                .to_ascii_lowercase()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Build the archive filename for one collection item.
///
/// ```
/// use lookbook_core::naming::export_filename;
///
/// assert_eq!(
///     export_filename("Hand On Hip", "original", 0, "png"),
///     "hand_on_hip-original-variation-1.png"
/// );
/// ```
pub fn export_filename(pose_name: &str, item_id: &str, index: usize, ext: &str) -> String {
    let pose = slugify(pose_name);
    let pose = if pose.is_empty() { "pose".to_string() } else { pose };
    format!("{pose}-{}-variation-{}.{ext}", slugify(item_id), index + 1)
}

// ---------------------------------------------------------------------------
// Format sniffing
// ---------------------------------------------------------------------------

/// Detect the image format from the leading bytes.
fn sniff(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes).ok()
}

/// File extension for an encoded image, falling back to `png`.
pub fn image_extension(bytes: &[u8]) -> &'static str {
    sniff(bytes)
        .and_then(|f| f.extensions_str().first().copied())
        .unwrap_or(DEFAULT_IMAGE_EXTENSION)
}

/// MIME type for an encoded image, falling back to `image/png`.
pub fn image_mime_type(bytes: &[u8]) -> &'static str {
    sniff(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or(DEFAULT_IMAGE_MIME)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_HEADER: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";
    const JPEG_HEADER: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

    #[test]
    fn key_segment_accepts_plain_ids() {
        assert!(validate_key_segment("pose id", "p1").is_ok());
        assert!(validate_key_segment("pose id", "front_hip-2").is_ok());
    }

    #[test]
    fn key_segment_rejects_separators() {
        assert!(validate_key_segment("pose id", "a:b").is_err());
        assert!(validate_key_segment("pose id", "a/b").is_err());
        assert!(validate_key_segment("pose id", "a b").is_err());
        assert!(validate_key_segment("pose id", "").is_err());
    }

    #[test]
    fn slugify_collapses_words() {
        assert_eq!(slugify("Hand On  Hip"), "hand_on_hip");
        assert_eq!(slugify("Walk (fast)!"), "walk_fast");
        assert_eq!(slugify("bg_3"), "bg_3");
    }

    #[test]
    fn export_filename_uses_one_based_index() {
        assert_eq!(
            export_filename("Side Profile", "bg3", 1, "jpg"),
            "side_profile-bg3-variation-2.jpg"
        );
    }

    #[test]
    fn export_filename_falls_back_for_empty_pose_name() {
        assert_eq!(export_filename("!!", "original", 0, "png"), "pose-original-variation-1.png");
    }

    #[test]
    fn sniffs_known_formats() {
        assert_eq!(image_extension(PNG_HEADER), "png");
        assert_eq!(image_mime_type(PNG_HEADER), "image/png");
        assert_eq!(image_mime_type(JPEG_HEADER), "image/jpeg");
    }

    #[test]
    fn unknown_bytes_fall_back_to_png() {
        assert_eq!(image_extension(b"not an image"), "png");
        assert_eq!(image_mime_type(b""), "image/png");
    }
}
