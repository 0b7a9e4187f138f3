//! Stable cache-key hashing of an operation and its accumulated clauses.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{clauses::ClauseStore, errors::RepoError};

/// Everything that distinguishes one cacheable call from another.
#[derive(Debug)]
pub struct FingerprintInput<'a, A: Serialize + ?Sized> {
    pub args: &'a A,
    pub repository_id: &'a str,
    pub model: &'a str,
    pub cache_driver: &'a str,
    pub cache_lifetime: Option<i64>,
    pub clauses: &'a ClauseStore,
}

/// SHA-256 over a framed encoding of the input, as lowercase hex.
///
/// Order-sensitive on clause contents: the same clauses recorded in a different
/// order may hash differently. Fails with `RepoError::Serialization` if the
/// arguments or clauses cannot be encoded; callers must not cache in that case.
pub fn fingerprint<A: Serialize + ?Sized>(input: &FingerprintInput<'_, A>) -> Result<String, RepoError> {
    let args = serde_json::to_vec(input.args).map_err(|err| RepoError::serialization("fingerprint arguments", err))?;
    let clauses =
        serde_json::to_vec(input.clauses).map_err(|err| RepoError::serialization("fingerprint clauses", err))?;

    let mut hasher = Sha256::new();
    hasher.update(b"repokit:fp:v1");
    write_bytes(&mut hasher, &args);
    write_bytes(&mut hasher, input.repository_id.as_bytes());
    write_bytes(&mut hasher, input.model.as_bytes());
    write_bytes(&mut hasher, input.cache_driver.as_bytes());
    match input.cache_lifetime {
        Some(lifetime) => {
            hasher.update([1u8]);
            hasher.update(lifetime.to_be_bytes());
        }
        None => hasher.update([0u8]),
    }
    write_bytes(&mut hasher, &clauses);

    Ok(to_hex(&hasher.finalize()))
}

fn write_bytes(hasher: &mut Sha256, bytes: &[u8]) {
    let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
    hasher.update(len.to_be_bytes());
    hasher.update(bytes);
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}
