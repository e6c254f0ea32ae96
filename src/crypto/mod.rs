pub mod agreement;
pub mod cipher;

pub use agreement::EphemeralAgreement;
pub use cipher::{decrypt_field, encrypt_field, CipherError};
