//! AES-256-CBC sealing with per-key random key material.

use {
    aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::Pkcs7},
    base64::{Engine as _, engine::general_purpose::STANDARD as B64},
    rand::RngCore,
    secrecy::{ExposeSecret, SecretString},
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    zeroize::Zeroize,
};

use crate::error::VaultError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// A sealed API key as persisted in `sub_providers`.
///
/// `key_material` is the per-key random generated at seal time; it is stored
/// alongside the ciphertext and must never be regenerated when reading.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SealedKey {
    pub key_material: String,
    pub iv: String,
    pub ciphertext: String,
}

/// Seals and opens API keys with a deployment-wide seed.
pub struct KeySealer {
    seed: SecretString,
}

impl KeySealer {
    #[must_use]
    pub fn new(seed: SecretString) -> Self {
        Self { seed }
    }

    /// Generate an ephemeral sealer for keyless dev boots. Keys sealed with
    /// it do not survive a restart.
    #[must_use]
    pub fn ephemeral() -> Self {
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        let sealer = Self::new(SecretString::new(B64.encode(seed)));
        seed.zeroize();
        sealer
    }

    /// Seal a plaintext key, generating fresh key material and IV.
    #[must_use]
    pub fn seal(&self, plaintext: &str) -> SealedKey {
        let mut key_material = [0u8; 32];
        let mut iv = [0u8; 16];
        rand::rng().fill_bytes(&mut key_material);
        rand::rng().fill_bytes(&mut iv);

        let mut cipher_key = self.derive_cipher_key(&key_material);
        let ciphertext = Aes256CbcEnc::new(&cipher_key.into(), &iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        cipher_key.zeroize();

        SealedKey {
            key_material: B64.encode(key_material),
            iv: B64.encode(iv),
            ciphertext: B64.encode(ciphertext),
        }
    }

    /// Open a sealed key back to plaintext.
    pub fn open(&self, sealed: &SealedKey) -> Result<SecretString, VaultError> {
        let key_material = B64.decode(&sealed.key_material)?;
        let iv = B64.decode(&sealed.iv)?;
        let ciphertext = B64.decode(&sealed.ciphertext)?;

        let key_material: [u8; 32] = key_material
            .try_into()
            .map_err(|_| VaultError::Malformed {
                field: "key_material",
            })?;
        let iv: [u8; 16] = iv
            .try_into()
            .map_err(|_| VaultError::Malformed { field: "iv" })?;

        let mut cipher_key = self.derive_cipher_key(&key_material);
        let plaintext = Aes256CbcDec::new(&cipher_key.into(), &iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
            .map_err(|_| VaultError::Decrypt)?;
        cipher_key.zeroize();

        let mut plaintext = plaintext;
        let result = String::from_utf8(plaintext.clone()).map_err(|_| VaultError::NotUtf8);
        plaintext.zeroize();
        result.map(SecretString::new)
    }

    /// Cipher key = SHA-256(seed || per-key material). The seed alone never
    /// touches the cipher, so leaking one record does not expose siblings.
    fn derive_cipher_key(&self, key_material: &[u8; 32]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.seed.expose_secret().as_bytes());
        hasher.update(key_material);
        hasher.finalize().into()
    }
}
