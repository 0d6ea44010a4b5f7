//! Relayer signing accounts, stored on disk as password-encrypted JSON.
//!
//! The private scalar is sealed with ChaCha20-Poly1305 under an argon2id
//! password key. Decrypted key material is zeroized on drop; the signing
//! key itself never leaves this module.

use std::path::Path;

use alloy_primitives::B256;
use chacha20poly1305::{ChaCha20Poly1305, Key, KeyInit, Nonce, aead::Aead};
use p256::ecdsa::{
    Signature, SigningKey,
    signature::{Signer, hazmat::PrehashSigner},
};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::RngCore;
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{RelayError, Result};

const ADDRESS_VERSION: u8 = 0x17;
const OP_CHECKSIG: u8 = 0xAC;

#[derive(Serialize, Deserialize)]
struct WalletFile {
    address: String,
    salt: String,
    nonce: String,
    ciphertext: String,
}

/// A decrypted signing account. Both chains verify ECDSA over P-256.
pub struct Account {
    signing_key: SigningKey,
    script_hash: [u8; 20],
}

impl Account {
    /// Decrypt the wallet at `path`. Failure here is fatal for the process.
    pub fn open(path: impl AsRef<Path>, password: &str) -> Result<Self> {
        let data = std::fs::read(path.as_ref())
            .map_err(|e| RelayError::Wallet(format!("read {}: {e}", path.as_ref().display())))?;
        let file: WalletFile = serde_json::from_slice(&data)
            .map_err(|e| RelayError::Wallet(format!("parse wallet: {e}")))?;

        let salt = decode_field("salt", &file.salt)?;
        let nonce = decode_field("nonce", &file.nonce)?;
        if nonce.len() != 12 {
            return Err(RelayError::Wallet("wallet nonce must be 12 bytes".into()));
        }
        let ciphertext = decode_field("ciphertext", &file.ciphertext)?;

        let key = derive_key(password, &salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
        let secret = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
                .map_err(|_| RelayError::Wallet("wrong password or corrupted wallet".into()))?,
        );

        let account = Self::from_secret(&secret)?;
        if account.address() != file.address {
            return Err(RelayError::Wallet("wallet address mismatch".into()));
        }
        Ok(account)
    }

    pub fn from_secret(secret: &[u8]) -> Result<Self> {
        let signing_key = SigningKey::from_slice(secret)
            .map_err(|e| RelayError::Wallet(format!("invalid private key: {e}")))?;
        let script_hash = hash160(&verification_script(
            signing_key.verifying_key().to_encoded_point(true).as_bytes(),
        ));
        Ok(Self {
            signing_key,
            script_hash,
        })
    }

    /// Create a fresh account and write its encrypted wallet to `path`.
    pub fn create(path: impl AsRef<Path>, password: &str) -> Result<Self> {
        let mut rng = rand::rngs::OsRng;
        let signing_key = SigningKey::random(&mut rng);
        let secret = Zeroizing::new(signing_key.to_bytes());

        let mut salt = [0u8; 16];
        rng.fill_bytes(&mut salt);
        let mut nonce = [0u8; 12];
        rng.fill_bytes(&mut nonce);

        let key = derive_key(password, &salt)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_slice()));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), secret.as_slice())
            .map_err(|_| RelayError::Wallet("encryption failure".into()))?;

        let account = Self::from_secret(secret.as_slice())?;
        let file = WalletFile {
            address: account.address(),
            salt: const_hex::encode(salt),
            nonce: const_hex::encode(nonce),
            ciphertext: const_hex::encode(&ciphertext),
        };
        let json = serde_json::to_vec_pretty(&file)
            .map_err(|e| RelayError::Wallet(format!("serialize wallet: {e}")))?;
        std::fs::write(path.as_ref(), json)
            .map_err(|e| RelayError::Wallet(format!("write {}: {e}", path.as_ref().display())))?;
        Ok(account)
    }

    /// SEC1 compressed public key, 33 bytes.
    pub fn public_key(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(true)
            .as_bytes()
            .to_vec()
    }

    pub fn script_hash(&self) -> [u8; 20] {
        self.script_hash
    }

    pub fn address(&self) -> String {
        script_hash_to_address(&self.script_hash)
    }

    /// ECDSA over SHA-256 of `message`, fixed-width `r || s`.
    pub fn sign_message(&self, message: &[u8]) -> [u8; 64] {
        let signature: Signature = self.signing_key.sign(message);
        let mut out = [0u8; 64];
        out.copy_from_slice(signature.to_bytes().as_slice());
        out
    }

    /// Sign an externally computed 32-byte digest.
    pub fn sign_digest(&self, digest: B256) -> Result<[u8; 64]> {
        let signature: Signature = self
            .signing_key
            .sign_prehash(digest.as_slice())
            .map_err(|e| RelayError::Wallet(format!("sign: {e}")))?;
        let mut out = [0u8; 64];
        out.copy_from_slice(signature.to_bytes().as_slice());
        Ok(out)
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

fn decode_field(field: &str, hex: &str) -> Result<Vec<u8>> {
    const_hex::decode(hex).map_err(|e| RelayError::Wallet(format!("wallet {field}: {e}")))
}

fn derive_key(password: &str, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
    let mut key = Zeroizing::new([0u8; 32]);
    argon2::Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| RelayError::Wallet(format!("key derivation: {e}")))?;
    Ok(key)
}

/// Single-signature verification script: `PUSH(33) key CHECKSIG`.
pub fn verification_script(compressed_key: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(35);
    script.push(compressed_key.len() as u8);
    script.extend_from_slice(compressed_key);
    script.push(OP_CHECKSIG);
    script
}

pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = Sha256::digest(data);
    let mut out = [0u8; 20];
    out.copy_from_slice(&Ripemd160::digest(sha));
    out
}

pub fn script_hash_to_address(script_hash: &[u8; 20]) -> String {
    let mut payload = Vec::with_capacity(25);
    payload.push(ADDRESS_VERSION);
    payload.extend_from_slice(script_hash);
    let checksum = Sha256::digest(Sha256::digest(&payload));
    payload.extend_from_slice(&checksum[..4]);
    bs58::encode(payload).into_string()
}

pub fn address_to_script_hash(address: &str) -> Result<[u8; 20]> {
    let payload = bs58::decode(address)
        .into_vec()
        .map_err(|e| RelayError::ChainData(format!("address {address}: {e}")))?;
    if payload.len() != 25 || payload[0] != ADDRESS_VERSION {
        return Err(RelayError::ChainData(format!(
            "address {address}: bad length or version"
        )));
    }
    let checksum = Sha256::digest(Sha256::digest(&payload[..21]));
    if payload[21..] != checksum[..4] {
        return Err(RelayError::ChainData(format!(
            "address {address}: checksum mismatch"
        )));
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&payload[1..21]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");
        let created = Account::create(&path, "hunter2").unwrap();
        let opened = Account::open(&path, "hunter2").unwrap();
        assert_eq!(created.script_hash(), opened.script_hash());
        assert_eq!(created.public_key(), opened.public_key());
    }

    #[test]
    fn wrong_password_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.json");
        Account::create(&path, "correct").unwrap();
        assert!(matches!(
            Account::open(&path, "incorrect").unwrap_err(),
            RelayError::Wallet(_)
        ));
    }

    #[test]
    fn address_round_trip() {
        let script_hash = [0x42u8; 20];
        let address = script_hash_to_address(&script_hash);
        assert_eq!(address_to_script_hash(&address).unwrap(), script_hash);
    }

    #[test]
    fn tampered_address_fails_checksum() {
        let address = script_hash_to_address(&[0x42u8; 20]);
        let tampered: String = address.chars().rev().collect();
        assert!(address_to_script_hash(&tampered).is_err());
    }

    #[test]
    fn signature_is_64_bytes_and_deterministic() {
        let account = Account::from_secret(&[7u8; 32]).unwrap();
        let first = account.sign_message(b"payload");
        let second = account.sign_message(b"payload");
        assert_eq!(first, second); // RFC 6979 nonces
        assert_eq!(first.len(), 64);
    }
}
