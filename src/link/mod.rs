//! Acoustic target link: block codec and the receiving threads.

pub mod codec;
pub mod receiver;

pub use codec::{BlockAssembler, CodecError, encode_blocks};
pub use receiver::{FrameReceiver, FrameStats, LinkError, LinkParams, TargetLink};
