//! Error taxonomy for a shuffle round
//!
//! Matches `spec.md` §7: `MalformedMessage` never escapes the round (it's
//! folded into [`crate::transcript::Outcome`]); everything else that can end
//! a round's optimistic path is a variant of [`RoundError`].

use thiserror::Error;

/// A round-ending error
///
/// Every variant except [`RoundError::InternalCryptoFailure`] drives the
/// round into [`crate::round::Phase::Blame`] rather than aborting outright;
/// see [`crate::round::Round::status`].
#[derive(Debug, Error)]
pub enum RoundError {
    /// a peer violated the protocol
    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] Violation),
    /// a phase-complete deadline expired
    #[error("timed out waiting for {phase}; missing: {missing:?}")]
    Timeout {
        /// phase that timed out
        phase: &'static str,
        /// members that failed to produce the expected message
        missing: Vec<u16>,
    },
    /// local key generation or decryption failed for reasons unrelated to
    /// peer behavior
    #[error("internal crypto failure")]
    InternalCryptoFailure(#[from] Bug),
}

/// A concrete way a peer can violate the protocol
#[derive(Debug, Error)]
pub enum Violation {
    /// `sender` sent an onion layer that failed to decrypt under our outer key
    #[error("member {sender} sent a ciphertext that failed to peel")]
    PeelFailure {
        /// the offending sender
        sender: u16,
    },
    /// the final ciphertext multiset doesn't match what shuffler 0 received
    #[error("final ciphertext multiset diverges from the committed inputs")]
    TranscriptMismatch,
    /// a member voted no-go, or computed a different transcript hash
    #[error("member {sender} voted no-go or disagreed on the transcript hash")]
    NoGo {
        /// the dissenting member
        sender: u16,
    },
    /// a shuffler forwarded its input/output out of order
    #[error("member {sender} sent its shuffle message out of the expected order")]
    OutOfOrderShuffle {
        /// the offending sender
        sender: u16,
    },
    /// a submitted blame log failed to verify
    #[error("member {sender} submitted a blame log with an invalid signature")]
    InvalidBlameLog {
        /// the offending sender
        sender: u16,
    },
}

/// An internal invariant was violated
///
/// Please report this if you encounter it: it means this implementation
/// disagrees with itself, not that a peer misbehaved.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct Bug(#[from] BugReason);

#[derive(Debug, Error)]
pub(crate) enum BugReason {
    #[error("key generation failed")]
    KeyGeneration,
    #[error("transcript is missing an entry that phase-complete already confirmed was present")]
    MissingTranscriptEntry,
    #[error("onion layer count didn't match the shuffler count")]
    LayerCountMismatch,
}

impl From<BugReason> for RoundError {
    fn from(reason: BugReason) -> Self {
        RoundError::InternalCryptoFailure(Bug(reason))
    }
}
