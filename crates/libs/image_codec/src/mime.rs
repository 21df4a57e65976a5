const FALLBACK_MIME: &str = "image/jpeg";

/// MIME type from the leading magic bytes, `image/jpeg` when unrecognised.
#[must_use]
pub fn sniff_mime(bytes: &[u8]) -> &'static str {
    match infer::get(bytes) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => kind.mime_type(),
        _ => FALLBACK_MIME,
    }
}
