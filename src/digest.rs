//! Content digest computation and validation. `sha256` is the primary
//! algorithm; `sha512` is accepted as a known secondary algorithm per the
//! OCI image spec's digest grammar.

use sha2::{Digest as _, Sha256};

use crate::error::Error;

pub const SHA256: &str = "sha256";
pub const SHA512: &str = "sha512";

fn hex_len(algorithm: &str) -> Option<usize> {
    match algorithm {
        SHA256 => Some(64),
        SHA512 => Some(128),
        _ => None,
    }
}

/// Compute `"sha256:" + lowercase hex` over `bytes`.
pub fn compute_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{SHA256}:{}", hex::encode(hasher.finalize()))
}

/// Validate that `digest` has the shape `algo:hex`, where `algo` is a known
/// algorithm and `hex` has exactly the length that algorithm produces.
pub fn validate(digest: &str) -> Result<(), Error> {
    let (algorithm, hex_part) = digest.split_once(':').ok_or_else(|| Error::InvalidDigest {
        digest: digest.to_string(),
        reason: "missing ':' separating algorithm from hex".into(),
    })?;

    let expected_len = hex_len(algorithm).ok_or_else(|| Error::InvalidDigest {
        digest: digest.to_string(),
        reason: format!("unknown digest algorithm {algorithm:?}"),
    })?;

    if hex_part.len() != expected_len || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::InvalidDigest {
            digest: digest.to_string(),
            reason: format!("hex part must be {expected_len} lowercase hex characters"),
        });
    }

    Ok(())
}

/// Compare two digest strings for equality, case-insensitively on the hex
/// part (algorithm is compared case-sensitively — registries always emit
/// lowercase algorithm names).
pub fn eq(a: &str, b: &str) -> bool {
    let Some((algo_a, hex_a)) = a.split_once(':') else {
        return false;
    };
    let Some((algo_b, hex_b)) = b.split_once(':') else {
        return false;
    };
    algo_a == algo_b && hex_a.eq_ignore_ascii_case(hex_b)
}

/// Verify that `data` hashes to `expected` (a validated `algo:hex` digest).
pub fn verify(expected: &str, data: &[u8]) -> Result<(), Error> {
    let (algorithm, _) = expected.split_once(':').ok_or_else(|| Error::InvalidDigest {
        digest: expected.to_string(),
        reason: "missing ':' separating algorithm from hex".into(),
    })?;

    let actual = match algorithm {
        SHA256 => compute_sha256(data),
        other => {
            return Err(Error::InvalidDigest {
                digest: expected.to_string(),
                reason: format!("verification not implemented for algorithm {other:?}"),
            });
        }
    };

    if eq(expected, &actual) {
        Ok(())
    } else {
        Err(Error::DigestMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
