use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

/// Content hash used to tag a stack with the template it was created from.
pub fn get_hash_value(data: impl AsRef<[u8]>) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(data.as_ref());
    let hash = hasher.finalize();
    URL_SAFE_NO_PAD.encode(hash.as_bytes())
}

#[test]
fn hash_value_is_stable_and_url_safe() {
    let a = get_hash_value(b"AWSTemplateFormatVersion: '2010-09-09'");
    let b = get_hash_value("AWSTemplateFormatVersion: '2010-09-09'");
    assert_eq!(a, b);
    // 32 bytes without padding.
    assert_eq!(a.len(), 43);
    assert!(!a.contains('=') && !a.contains('+') && !a.contains('/'));
    assert_ne!(a, get_hash_value(b""));
}
