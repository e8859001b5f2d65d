pub mod domain;
pub mod error;
pub mod expiry;
pub mod protocol;
