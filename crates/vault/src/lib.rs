//! At-rest sealing of sub-provider API keys.
//!
//! The scheme is AES-256-CBC with per-key random key material stored next to
//! the ciphertext; the actual cipher key is derived from that material plus
//! the deployment-wide `MASTER_ENCRYPTION_KEY` seed. This preserves
//! compatibility with existing sealed records (the stored material is never
//! rotated on read).
//!
//! TODO(security): replace with an AEAD + KMS-backed wrapping key once the
//! stored fleet can be migrated; CBC without a MAC does not authenticate.

mod error;
mod seal;

pub use {
    error::VaultError,
    seal::{KeySealer, SealedKey},
};
