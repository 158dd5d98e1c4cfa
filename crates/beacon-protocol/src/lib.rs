//! # beacon-protocol
//!
//! Wire protocol definitions for the Beacon message broker.
//!
//! Every message is a flat JSON record on its own line. The `command` field
//! selects the semantics; the remaining fields (`topic`, `payload`,
//! `correlationId`, `replyRoute`, `topicPattern`, `error`, `originId`) are
//! interpreted per command.
//!
//! ## Command groups
//!
//! - `AUTH` / `CNN` / `ER_AUTH_FAILED` - Connection handshake
//! - `SUB` / `SER` / `PUB` / `OK` - Publish/subscribe and service registration
//! - `REQ` / `RES` / `PING` / `PONG` - Correlated request/reply
//! - `GET` / `SET` / `DEL` / `BADD` / `BDEL` / `BFK` / `BFV` - Key/value store
//! - `DB_*` - Document store
//!
//! ## Example
//!
//! ```rust
//! use beacon_protocol::{codec, Frame};
//!
//! let frame = Frame::publish("sensors.kitchen.temp", "21.5");
//!
//! let encoded = codec::encode(&frame).unwrap();
//! assert!(encoded.ends_with(b"\n"));
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod address;
pub mod codec;
pub mod frames;

pub use address::{ConnectionUrl, UrlError};
pub use codec::{decode, encode, FrameCodec, ProtocolError};
pub use frames::{Command, Frame, SELF_ROUTE};
