//! Database bootstrap for the document collections

pub mod init;

pub use init::*;
