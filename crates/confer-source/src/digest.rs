/// Hex digest of `data`, used as a content-derived change token.
///
/// BLAKE3 truncated to 128 bits, so tokens have the familiar 32 hex digit
/// shape of object-storage entity tags.
pub fn content_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    hex::encode(&hash.as_bytes()[..16])
}

/// [`content_hash`] wrapped in quotes, as entity tags are sent.
pub fn etag(data: &[u8]) -> String {
    format!("\"{}\"", content_hash(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_deterministic_and_content_sensitive() {
        assert_eq!(content_hash(b"a: 1"), content_hash(b"a: 1"));
        assert_ne!(content_hash(b"a: 1"), content_hash(b"a: 2"));
        assert_eq!(content_hash(b"").len(), 32);
    }

    #[test]
    fn etag_is_quoted() {
        let tag = etag(b"x");
        assert!(tag.starts_with('"') && tag.ends_with('"'));
        assert_eq!(tag.len(), 34);
    }
}
