use sha2::{Digest, Sha256};

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Content digest of a protocol source, as stored in the protocol cache.
pub fn protocol_digest(source: &str) -> String {
    format!("sha256:{}", sha256_hex(source))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_and_content_sensitive() {
        let a = protocol_digest("{\"id\":\"TC-200\"}");
        assert_eq!(a, protocol_digest("{\"id\":\"TC-200\"}"));
        assert_ne!(a, protocol_digest("{\"id\":\"TC-201\"}"));
        assert!(a.starts_with("sha256:"));
        assert_eq!(a.len(), "sha256:".len() + 64);
    }
}
