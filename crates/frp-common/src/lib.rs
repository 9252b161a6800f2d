//! Common types for the FRP operator: typed objects, CRDs, secrets, errors

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod labels;
pub mod object;
pub mod secret;
pub mod store;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label set on objects generated for an owning FRP resource
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`]
pub const LABEL_MANAGED_BY_FRP: &str = "frp-operator";

pub(crate) fn default_true() -> bool {
    true
}

/// Compact hash of `input`: first 8 bytes of SHA-256, hex encoded.
///
/// Stable across processes, used for config-hash status fields.
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_short() {
        let a = deterministic_hash("[common]\nbind_port = 7000\n");
        assert_eq!(a.len(), 16);
        assert_eq!(a, deterministic_hash("[common]\nbind_port = 7000\n"));
        assert_ne!(a, deterministic_hash("[common]\nbind_port = 7001\n"));
        assert_eq!(deterministic_hash(""), "e3b0c44298fc1c14");
    }
}
