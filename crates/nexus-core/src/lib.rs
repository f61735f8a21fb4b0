//! # nexus-core
//!
//! Packet model and wire codecs shared by every Nexus crate.
//!
//! - **Packet**: the typed unit of exchange (`type`, `streamId`, `data`)
//! - **Codecs**: [`PacketCodec`] with a JSON and a length-prefixed delimited
//!   implementation, selected at runtime through [`CodecConfig`]
//! - **Errors**: [`DecodeError`] for malformed frames, [`CodecError`] for
//!   invalid codec configuration

#![deny(unsafe_code)]

pub mod codec;
pub mod errors;
pub mod packet;

pub use codec::{CodecConfig, DelimitedCodec, JsonCodec, PacketCodec};
pub use errors::{CodecError, DecodeError};
pub use packet::{KILL_PREFIX, Packet};
