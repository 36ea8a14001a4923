//! Content digests for change detection

use sha2::{Digest, Sha256};

/// Hex digest of a single source's raw content.
pub fn digest_content(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Aggregate digest over per-source digests, in the iteration order given.
///
/// Callers pass digests in lexical source order so the result is stable.
pub fn digest_all<'a, I>(digests: I) -> String
where
    I: IntoIterator<Item = &'a String>,
{
    let mut hasher = Sha256::new();
    for digest in digests {
        hasher.update(digest.as_bytes());
    }
    hex::encode(hasher.finalize())
}
