//! Anonymous message-shuffling protocol with a blame/accusation sub-protocol
//!
//! Provides one fixed-size message of unlinkable delivery per honest
//! participant to a designated sink, under the assumption that at least one
//! shuffler among the group is honest. When the optimistic path can't
//! terminate, the round's internal blame sub-protocol identifies at least
//! one misbehaving participant rather than leaving the round stuck.
//!
//! [`round::Round`] is the entry point: it owns the state machine
//! described in that module, is driven purely through
//! [`round::Round::deliver`]/[`round::Round::tick`], and has no suspension
//! points of its own.

#![warn(missing_docs)]

pub mod codec;
pub mod crypto;
pub mod error;
pub mod messages;
pub mod progress;
pub mod round;
pub mod transcript;

pub use error::RoundError;
pub use round::{Network, Round, RoundConfig, Sink, Status};
