//! Protocol module containing the envelope types, the JSON codec, and close reasons.

pub mod close;
pub mod codec;
pub mod messages;

pub use close::CloseReason;
pub use codec::{CodecError, Message};
pub use messages::*;
