pub mod domain;
pub mod error;
pub mod pda;
pub mod protocol;
