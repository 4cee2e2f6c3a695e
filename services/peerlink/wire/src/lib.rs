//! Length-prefixed packet framing for peerlink.
//!
//! Every packet exchanged with a peer travels as exactly one frame. There is no
//! magic number, version byte, or checksum: the wire carries framing only.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------+----------------------------+
//! | u32 length (LE)      | number of payload bytes    |
//! +----------------------+----------------------------+
//! | payload              | variable (0..max)          |
//! +----------------------+----------------------------+
//! ```
//!
//! A length of zero is a legal, empty payload.
//!
//! ## Example
//!
//! ```rust
//! use peerlink_wire::{encode, FrameCodec, DEFAULT_MAX_FRAME_SIZE};
//!
//! let frame = encode(b"hello", DEFAULT_MAX_FRAME_SIZE).unwrap();
//! let mut codec = FrameCodec::new(DEFAULT_MAX_FRAME_SIZE);
//!
//! let (head, tail) = frame.split_at(3);
//! assert_eq!(codec.feed(head).count(), 0);
//!
//! let payloads: Vec<_> = codec.feed(tail).collect::<Result<_, _>>().unwrap();
//! assert_eq!(payloads, vec![bytes::Bytes::from_static(b"hello")]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod frame;

// Re-export main types
pub use codec::{FrameCodec, Frames};
pub use error::WireError;
pub use frame::{
    encode, encode_into, peek_frame_len, DEFAULT_MAX_FRAME_SIZE, HARD_MAX_FRAME_SIZE,
    LEN_PREFIX_SIZE,
};
