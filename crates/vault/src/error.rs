use thiserror::Error;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("invalid base64 in sealed key: {0}")]
    Encoding(#[from] base64::DecodeError),

    #[error("sealed key has malformed {field}")]
    Malformed { field: &'static str },

    #[error("decryption failed (wrong seed or corrupted record)")]
    Decrypt,

    #[error("decrypted key is not valid UTF-8")]
    NotUtf8,
}
