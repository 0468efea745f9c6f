use std::num::NonZeroU32;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey};
use ring::pbkdf2;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::errors::{WalletError, WalletResult};

/// Lowest PBKDF2 work factor the vault will ever use.
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Password verification and authenticated encryption of wallet secrets.
///
/// Blobs are `base64(salt || iv || ciphertext || tag)`: a fresh 16-byte salt
/// feeds PBKDF2-HMAC-SHA256, and a fresh 12-byte IV is used with AES-256-GCM.
#[derive(Debug, Clone, Copy)]
pub struct CredentialVault {
    iterations: NonZeroU32,
}

impl CredentialVault {
    pub fn new(iterations: u32) -> Self {
        let clamped = iterations.max(MIN_PBKDF2_ITERATIONS);
        Self {
            iterations: NonZeroU32::new(clamped).unwrap_or(NonZeroU32::MIN),
        }
    }

    pub fn iterations(&self) -> u32 {
        self.iterations.get()
    }

    /// One-way SHA-256 digest of the password, hex encoded.
    ///
    /// Used only for equality checks, never to derive encryption keys.
    pub fn hash(&self, password: &SecretString) -> String {
        hex::encode(sha256(password))
    }

    /// Recompute the digest and compare it in constant time.
    pub fn verify(&self, password: &SecretString, digest: &str) -> bool {
        let expected = match hex::decode(digest) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        let computed = sha256(password);
        bool::from(computed.as_slice().ct_eq(expected.as_slice()))
    }

    pub fn encrypt(&self, plaintext: &[u8], password: &SecretString) -> WalletResult<String> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);

        let key = self.derive_key(password, &salt);
        let sealing_key = aead_key(&key)?;

        let mut in_out = Vec::with_capacity(SALT_LEN + NONCE_LEN + plaintext.len() + 16);
        in_out.extend_from_slice(plaintext);
        sealing_key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                &mut in_out,
            )
            .map_err(|_| WalletError::CryptoError("Encryption failure".to_string()))?;

        let mut blob = Vec::with_capacity(SALT_LEN + NONCE_LEN + in_out.len());
        blob.extend_from_slice(&salt);
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&in_out);
        Ok(BASE64.encode(blob))
    }

    /// Inverse of [`CredentialVault::encrypt`].
    ///
    /// Any failure (bad encoding, truncated blob, wrong password, tampering)
    /// collapses into `DecryptionError` and no plaintext is returned.
    pub fn decrypt(&self, blob: &str, password: &SecretString) -> WalletResult<Zeroizing<Vec<u8>>> {
        let data = BASE64
            .decode(blob.trim())
            .map_err(|_| WalletError::DecryptionError)?;
        if data.len() < SALT_LEN + NONCE_LEN + aead::AES_256_GCM.tag_len() {
            return Err(WalletError::DecryptionError);
        }

        let (salt, rest) = data.split_at(SALT_LEN);
        let (nonce_slice, ciphertext) = rest.split_at(NONCE_LEN);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(nonce_slice);

        let key = self.derive_key(password, salt);
        let opening_key = aead_key(&key).map_err(|_| WalletError::DecryptionError)?;

        let mut in_out = Zeroizing::new(ciphertext.to_vec());
        let plaintext_len = opening_key
            .open_in_place(
                Nonce::assume_unique_for_key(nonce_bytes),
                Aad::empty(),
                in_out.as_mut_slice(),
            )
            .map_err(|_| WalletError::DecryptionError)?
            .len();
        in_out.truncate(plaintext_len);
        Ok(in_out)
    }

    fn derive_key(&self, password: &SecretString, salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        pbkdf2::derive(
            pbkdf2::PBKDF2_HMAC_SHA256,
            self.iterations,
            salt,
            password.expose_secret().as_bytes(),
            key.as_mut(),
        );
        key
    }
}

impl Default for CredentialVault {
    fn default() -> Self {
        Self::new(MIN_PBKDF2_ITERATIONS)
    }
}

fn sha256(password: &SecretString) -> [u8; 32] {
    let digest = Sha256::digest(password.expose_secret().as_bytes());
    let mut output = [0u8; 32];
    output.copy_from_slice(&digest);
    output
}

fn aead_key(key: &Zeroizing<[u8; KEY_LEN]>) -> WalletResult<LessSafeKey> {
    let unbound_key = UnboundKey::new(&aead::AES_256_GCM, key.as_ref())
        .map_err(|e| WalletError::CryptoError(format!("Invalid encryption key: {e}")))?;
    Ok(LessSafeKey::new(unbound_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(password: &str) -> SecretString {
        SecretString::from(password.to_string())
    }

    #[test]
    fn encrypt_and_decrypt_round_trip() {
        let vault = CredentialVault::default();
        let blob = vault
            .encrypt(b"super secret key material", &secret("Passw0rd!"))
            .unwrap();
        let plaintext = vault.decrypt(&blob, &secret("Passw0rd!")).unwrap();
        assert_eq!(plaintext.as_slice(), b"super secret key material");
    }

    #[test]
    fn decrypting_with_wrong_password_fails() {
        let vault = CredentialVault::default();
        let blob = vault.encrypt(b"payload", &secret("Passw0rd!")).unwrap();
        let err = vault.decrypt(&blob, &secret("Passw0rd?")).unwrap_err();
        assert_eq!(err, WalletError::DecryptionError);
    }

    #[test]
    fn every_encryption_uses_fresh_salt_and_iv() {
        let vault = CredentialVault::default();
        let first = BASE64
            .decode(vault.encrypt(b"same", &secret("Passw0rd!")).unwrap())
            .unwrap();
        let second = BASE64
            .decode(vault.encrypt(b"same", &secret("Passw0rd!")).unwrap())
            .unwrap();
        assert_ne!(first[..SALT_LEN], second[..SALT_LEN]);
        assert_ne!(
            first[SALT_LEN..SALT_LEN + NONCE_LEN],
            second[SALT_LEN..SALT_LEN + NONCE_LEN]
        );
        assert_ne!(first, second);
    }

    #[test]
    fn tampered_blob_is_rejected() {
        let vault = CredentialVault::default();
        let blob = vault.encrypt(b"payload", &secret("Passw0rd!")).unwrap();
        let mut bytes = BASE64.decode(&blob).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = BASE64.encode(bytes);
        assert_eq!(
            vault.decrypt(&tampered, &secret("Passw0rd!")).unwrap_err(),
            WalletError::DecryptionError
        );
    }

    #[test]
    fn malformed_blobs_are_decryption_errors() {
        let vault = CredentialVault::default();
        assert_eq!(
            vault.decrypt("not base64 !!", &secret("x")).unwrap_err(),
            WalletError::DecryptionError
        );
        assert_eq!(
            vault
                .decrypt(&BASE64.encode([0u8; 20]), &secret("x"))
                .unwrap_err(),
            WalletError::DecryptionError
        );
    }

    #[test]
    fn hash_and_verify() {
        let vault = CredentialVault::default();
        let digest = vault.hash(&secret("Passw0rd!"));
        assert_eq!(digest.len(), 64);
        assert!(vault.verify(&secret("Passw0rd!"), &digest));
        assert!(!vault.verify(&secret("passw0rd!"), &digest));
        assert!(!vault.verify(&secret("Passw0rd!"), "zz"));
        assert!(!vault.verify(&secret("Passw0rd!"), &digest[..32]));
    }

    #[test]
    fn iterations_never_drop_below_minimum() {
        assert_eq!(CredentialVault::new(10).iterations(), MIN_PBKDF2_ITERATIONS);
        assert_eq!(CredentialVault::new(250_000).iterations(), 250_000);
    }
}
