use argon2::{password_hash::Output, Algorithm, Argon2, Params, Version};
use base64ct::{Base64Unpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use tracing::error;

use crate::errors::StoreError;

// Process-wide Argon2id parameters; never taken from a request.
const ARGON_TIME_COST: u32 = 1;
const ARGON_MEMORY_KIB: u32 = 64 * 1024;
const ARGON_PARALLELISM: u32 = 4;
const ARGON_KEY_LEN: usize = 32;

pub const SALT_LEN: usize = 16;
const SEPARATOR: char = '$';

fn argon2() -> Result<Argon2<'static>, StoreError> {
    let params = Params::new(
        ARGON_MEMORY_KIB,
        ARGON_TIME_COST,
        ARGON_PARALLELISM,
        Some(ARGON_KEY_LEN),
    )
    .map_err(|e| {
        error!(error = %e, "argon2 params error");
        StoreError::Hashing(anyhow::anyhow!(e.to_string()))
    })?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn derive_key(plain: &str, salt: &[u8]) -> Result<[u8; ARGON_KEY_LEN], StoreError> {
    let mut key = [0u8; ARGON_KEY_LEN];
    argon2()?
        .hash_password_into(plain.as_bytes(), salt, &mut key)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password_into error");
            StoreError::Hashing(anyhow::anyhow!(e.to_string()))
        })?;
    Ok(key)
}

/// Hashes `plain` with a fresh random salt into `base64(salt)$base64(key)`,
/// both parts unpadded.
pub fn hash_password(plain: &str) -> Result<String, StoreError> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let key = derive_key(plain, &salt)?;
    Ok(format!(
        "{}{SEPARATOR}{}",
        Base64Unpadded::encode_string(&salt),
        Base64Unpadded::encode_string(&key)
    ))
}

/// Re-derives the key from the stored salt and compares in constant time.
pub fn verify_password(plain: &str, stored: &str) -> Result<bool, StoreError> {
    let (salt, key) = stored
        .split_once(SEPARATOR)
        .ok_or_else(|| StoreError::validation("stored password hash has no salt separator"))?;
    let salt = Base64Unpadded::decode_vec(salt)
        .map_err(|_| StoreError::validation("stored password salt is not valid base64"))?;
    let expected = Base64Unpadded::decode_vec(key)
        .map_err(|_| StoreError::validation("stored password hash is not valid base64"))?;
    if salt.len() != SALT_LEN || expected.len() != ARGON_KEY_LEN {
        return Err(StoreError::validation("stored password hash has an unexpected length"));
    }

    let derived = derive_key(plain, &salt)?;
    let expected = Output::new(&expected).map_err(|e| StoreError::validation(e.to_string()))?;
    let derived = Output::new(&derived).map_err(|e| StoreError::validation(e.to_string()))?;
    Ok(expected == derived)
}
