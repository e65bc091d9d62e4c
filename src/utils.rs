pub mod aes;
pub mod common;
pub mod global;
pub mod mapped;
pub mod signature;
