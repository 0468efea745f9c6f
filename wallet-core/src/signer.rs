use std::fmt;

use bip32::{DerivationPath, XPrv};
use bip39::{Language, Mnemonic};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rlp::RlpStream;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use zeroize::Zeroizing;

use crate::errors::{WalletError, WalletResult};

/// BIP-44 path of the first Ethereum account.
pub const ETH_DERIVATION_PATH: &str = "m/44'/60'/0'/0/0";

/// Freshly generated key material. The private key is wiped on drop.
pub struct KeyPair {
    pub address: String,
    /// Uncompressed SEC1 public key, `0x04`-prefixed hex.
    pub public_key: String,
    pub private_key: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address)
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Legacy (pre-1559) transaction, signed with EIP-155 replay protection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsignedTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u128,
    pub to: String,
    pub value: u128,
    #[serde(default)]
    pub data: Vec<u8>,
    pub chain_id: u64,
}

impl UnsignedTransaction {
    /// Keccak-256 of `rlp([nonce, gasPrice, gasLimit, to, value, data, chainId, 0, 0])`.
    pub fn signing_hash(&self) -> WalletResult<[u8; 32]> {
        let mut stream = RlpStream::new_list(9);
        self.append_base_fields(&mut stream)?;
        stream.append(&self.chain_id);
        stream.append(&0u8);
        stream.append(&0u8);
        Ok(keccak256(&stream.out()))
    }

    fn append_base_fields(&self, stream: &mut RlpStream) -> WalletResult<()> {
        let to = decode_address(&self.to)?;
        stream
            .append(&self.nonce)
            .append(&self.gas_price)
            .append(&self.gas_limit)
            .append(&to)
            .append(&self.value)
            .append(&self.data);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedTransaction {
    /// `0x`-prefixed RLP, ready for `eth_sendRawTransaction`.
    pub raw_transaction: String,
    pub hash: String,
}

/// Key generation and signing boundary. Private keys cross it only as
/// short-lived byte slices.
pub trait SigningProvider: Send + Sync {
    fn generate_key_pair(&self, mnemonic: Option<&str>) -> WalletResult<KeyPair>;

    fn sign_transaction(
        &self,
        private_key: &[u8],
        tx: &UnsignedTransaction,
    ) -> WalletResult<SignedTransaction>;

    /// EIP-191 `personal_sign`; returns `0x`-hex `r || s || v`.
    fn sign_message(&self, private_key: &[u8], message: &[u8]) -> WalletResult<String>;

    fn verify_message(&self, message: &[u8], signature: &str, address: &str) -> WalletResult<bool>;
}

#[derive(Debug, Clone, Default)]
pub struct Secp256k1Signer;

impl Secp256k1Signer {
    pub fn new() -> Self {
        Self
    }

    fn signing_key(private_key: &[u8]) -> WalletResult<SigningKey> {
        SigningKey::from_slice(private_key)
            .map_err(|_| WalletError::SigningError("Invalid private key".to_string()))
    }

    fn key_from_mnemonic(phrase: &str) -> WalletResult<SigningKey> {
        let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ");
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, &normalized)
            .map_err(|e| WalletError::KeyGenerationError(format!("Invalid mnemonic: {}", e)))?;
        let seed = Zeroizing::new(mnemonic.to_seed(""));

        let path: DerivationPath = ETH_DERIVATION_PATH
            .parse()
            .map_err(|e| WalletError::KeyGenerationError(format!("Invalid derivation path: {}", e)))?;
        let xprv = XPrv::derive_from_path(seed.as_slice(), &path)
            .map_err(|e| WalletError::KeyGenerationError(format!("Derivation failed: {}", e)))?;

        Ok(xprv.private_key().clone())
    }
}

impl SigningProvider for Secp256k1Signer {
    fn generate_key_pair(&self, mnemonic: Option<&str>) -> WalletResult<KeyPair> {
        let signing_key = match mnemonic {
            Some(phrase) => Self::key_from_mnemonic(phrase)?,
            None => SigningKey::random(&mut OsRng),
        };

        let verifying_key = signing_key.verifying_key();
        Ok(KeyPair {
            address: address_from_key(verifying_key),
            public_key: format!(
                "0x{}",
                hex::encode(verifying_key.to_encoded_point(false).as_bytes())
            ),
            private_key: Zeroizing::new(signing_key.to_bytes().to_vec()),
        })
    }

    fn sign_transaction(
        &self,
        private_key: &[u8],
        tx: &UnsignedTransaction,
    ) -> WalletResult<SignedTransaction> {
        let signing_key = Self::signing_key(private_key)?;
        let hash = tx.signing_hash()?;
        let (signature, recovery_id) = signing_key
            .sign_prehash_recoverable(&hash)
            .map_err(|e| WalletError::SigningError(e.to_string()))?;

        let v = u128::from(recovery_id.to_byte()) + u128::from(tx.chain_id) * 2 + 35;
        let (r, s) = signature.split_bytes();

        let mut stream = RlpStream::new_list(9);
        tx.append_base_fields(&mut stream)?;
        stream
            .append(&v)
            .append(&trim_leading_zeros(&r))
            .append(&trim_leading_zeros(&s));
        let raw = stream.out().to_vec();

        Ok(SignedTransaction {
            hash: format!("0x{}", hex::encode(keccak256(&raw))),
            raw_transaction: format!("0x{}", hex::encode(raw)),
        })
    }

    fn sign_message(&self, private_key: &[u8], message: &[u8]) -> WalletResult<String> {
        let signing_key = Self::signing_key(private_key)?;
        let hash = personal_message_hash(message);
        let (signature, recovery_id) = signing_key
            .sign_prehash_recoverable(&hash)
            .map_err(|e| WalletError::SigningError(e.to_string()))?;

        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(27 + recovery_id.to_byte());
        Ok(format!("0x{}", hex::encode(bytes)))
    }

    fn verify_message(&self, message: &[u8], signature: &str, address: &str) -> WalletResult<bool> {
        let bytes = hex::decode(signature.trim_start_matches("0x"))
            .map_err(|_| WalletError::ValidationError("Signature is not valid hex".to_string()))?;
        if bytes.len() != 65 {
            return Err(WalletError::ValidationError(
                "Signature must be 65 bytes".to_string(),
            ));
        }

        let v = bytes[64];
        let recovery_byte = if v >= 27 { v - 27 } else { v };
        let Some(recovery_id) = RecoveryId::from_byte(recovery_byte) else {
            return Ok(false);
        };
        let Ok(signature) = Signature::from_slice(&bytes[..64]) else {
            return Ok(false);
        };

        let hash = personal_message_hash(message);
        match VerifyingKey::recover_from_prehash(&hash, &signature, recovery_id) {
            Ok(key) => Ok(address_from_key(&key).eq_ignore_ascii_case(address)),
            Err(_) => Ok(false),
        }
    }
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut output = [0u8; 32];
    output.copy_from_slice(&Keccak256::digest(data));
    output
}

/// `keccak256("\x19Ethereum Signed Message:\n" || len || message)`
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut prefixed = format!("\x19Ethereum Signed Message:\n{}", message.len()).into_bytes();
    prefixed.extend_from_slice(message);
    keccak256(&prefixed)
}

/// EIP-55 checksummed address of a public key.
pub fn address_from_key(key: &VerifyingKey) -> String {
    let encoded = key.to_encoded_point(false);
    let hash = keccak256(&encoded.as_bytes()[1..]);
    to_checksum_address(&hex::encode(&hash[12..]))
}

pub fn to_checksum_address(address: &str) -> String {
    let lower = address.trim_start_matches("0x").to_ascii_lowercase();
    let hash = hex::encode(keccak256(lower.as_bytes()));

    let checksummed: String = lower
        .chars()
        .zip(hash.chars())
        .map(|(c, h)| match h.to_digit(16) {
            Some(nibble) if nibble >= 8 => c.to_ascii_uppercase(),
            _ => c,
        })
        .collect();
    format!("0x{}", checksummed)
}

fn decode_address(address: &str) -> WalletResult<Vec<u8>> {
    let bytes = hex::decode(address.trim_start_matches("0x"))
        .map_err(|_| WalletError::ValidationError(format!("Invalid address: {}", address)))?;
    if bytes.len() != 20 {
        return Err(WalletError::ValidationError(format!(
            "Invalid address: {}",
            address
        )));
    }
    Ok(bytes)
}

/// RLP integers are big-endian with no leading zero bytes.
fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().skip_while(|b| **b == 0).copied().collect()
}
