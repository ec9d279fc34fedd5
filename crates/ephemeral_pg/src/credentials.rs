//! Random admin password generation.

use crate::error::{ProvisionError, Result};
use rand::rngs::OsRng;
use rand::RngCore;

/// Length of every generated password.
pub const PASSWORD_LENGTH: usize = 32;

/// Characters a generated password is drawn from.
pub const PASSWORD_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

// Largest multiple of the alphabet size that fits in a byte; bytes at or
// above it are rejected so every letter is equally likely.
const ACCEPT_BELOW: u8 = (256 / PASSWORD_ALPHABET.len() * PASSWORD_ALPHABET.len()) as u8;

/// Generate a password from the operating system's secure random source.
pub fn random_password() -> Result<String> {
    random_password_with(&mut OsRng)
}

/// Generate a password from `rng`, failing if it ever errors.
pub fn random_password_with<R: RngCore + ?Sized>(rng: &mut R) -> Result<String> {
    let mut password = String::with_capacity(PASSWORD_LENGTH);
    let mut buf = [0u8; PASSWORD_LENGTH];

    while password.len() < PASSWORD_LENGTH {
        rng.try_fill_bytes(&mut buf)
            .map_err(ProvisionError::CredentialGeneration)?;

        for byte in buf {
            if password.len() == PASSWORD_LENGTH {
                break;
            }
            if byte < ACCEPT_BELOW {
                let idx = usize::from(byte) % PASSWORD_ALPHABET.len();
                password.push(char::from(PASSWORD_ALPHABET[idx]));
            }
        }
    }

    Ok(password)
}
