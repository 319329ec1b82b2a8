//! Tag=value wire format: field tags, the in-memory message and the codec.

pub mod codec;
pub mod message;
pub mod tags;

pub use codec::{checksum, split_frame, MessageCodec, SOH};
pub use message::{Field, Message, MsgType};
