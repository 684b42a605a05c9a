//! Placeholder credential hashing for imported accounts (Argon2id, PHC string).

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHasher, SaltString},
    Argon2,
};

use crate::error::{ImportError, ImportResult};

pub fn hash_password(password: &str) -> ImportResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ImportError::Credential(e.to_string()))
}
