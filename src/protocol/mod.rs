//! SFTP version 3 wire codec.
//!
//! Purely functional: nothing in here does I/O or owns connection state.
//! The rest of the crate treats this module as a black box that turns
//! requests into bytes and frames into typed responses.

pub(crate) mod attrs;
pub(crate) mod constants;
pub(crate) mod packet;
pub(crate) mod wire;

pub use packet::StatVfs;
