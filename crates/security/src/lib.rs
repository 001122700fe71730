//! Security module for the aicarpool gateway — encryption of upstream
//! credentials at rest.

pub mod secrets;

pub use secrets::{EncryptedValue, SecretError, SecretsManager};
