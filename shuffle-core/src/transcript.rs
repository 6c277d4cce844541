//! Append-only record of every inbound message, indexed by `(sender, phase)`
//!
//! `spec.md` §4.1: the transcript log is "the single source of truth for
//! blame: honest replay of an attested log must reproduce the sender's
//! observable actions." It never records outbound-only bookkeeping; only
//! the canonical bytes and signature of each accepted message, so that a
//! snapshot of it is exactly what [`crate::messages::BlameMsg`] discloses.

use std::collections::HashMap;

use generic_ec::{Curve, Point, Scalar};
use serde::{Deserialize, Serialize};

use crate::crypto::sign;
use crate::messages::Phase;

/// One accepted log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Canonical bytes of the message this entry records
    pub bytes: Vec<u8>,
    /// The sender's signature over [`LogEntry::bytes`]
    pub signature_bytes: Vec<u8>,
}

/// Result of [`TranscriptLog::append`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// First message for this `(sender, phase)`; recorded
    Accepted,
    /// A message for this `(sender, phase)` was already recorded
    DuplicateIgnored,
    /// The signature didn't verify; never recorded
    SignatureInvalid,
}

/// Append-only record of accepted messages, indexed by `(sender, phase)`
///
/// At most one entry is ever recorded per `(sender, phase)` pair, per
/// `spec.md` §3's at-most-once invariant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptLog {
    entries: HashMap<(u16, PhaseKey), LogEntry>,
}

/// `Phase` isn't `Hash`/`Eq` by derive-friendly repr alone once it carries
/// doc variants; this mirrors it as a plain key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct PhaseKey(u8);

impl From<Phase> for PhaseKey {
    fn from(p: Phase) -> Self {
        PhaseKey(p.tag())
    }
}

impl TranscriptLog {
    /// An empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `bytes`/`signature_bytes` from `sender` at `phase`, after
    /// checking the signature against `signer_pub`
    ///
    /// `bytes` must be the canonical signed bytes produced by
    /// [`crate::messages::signed_bytes`], and `signature_bytes` the
    /// JSON-encoded [`sign::Signature`] over them.
    pub fn append<E: Curve>(
        &mut self,
        phase: Phase,
        sender: u16,
        signer_pub: &Point<E>,
        bytes: Vec<u8>,
        signature_bytes: Vec<u8>,
    ) -> Outcome
    where
    {
        let key = (sender, PhaseKey::from(phase));
        if self.entries.contains_key(&key) {
            return Outcome::DuplicateIgnored;
        }
        let Ok(signature) = serde_json::from_slice::<sign::Signature<E>>(&signature_bytes) else {
            return Outcome::SignatureInvalid;
        };
        if !sign::verify(signer_pub, &bytes, &signature) {
            return Outcome::SignatureInvalid;
        }
        self.entries.insert(
            key,
            LogEntry {
                bytes,
                signature_bytes,
            },
        );
        Outcome::Accepted
    }

    /// The recorded entry for `(sender, phase)`, if any
    pub fn get(&self, sender: u16, phase: Phase) -> Option<&LogEntry> {
        self.entries.get(&(sender, PhaseKey::from(phase)))
    }

    /// Every member index in `expected` missing an entry at `phase`
    pub fn missing(&self, phase: Phase, expected: impl IntoIterator<Item = u16>) -> Vec<u16> {
        expected
            .into_iter()
            .filter(|&m| self.get(m, phase).is_none())
            .collect()
    }

    /// Every entry recorded for `sender`, across all phases, oldest phase tag first
    pub fn entries_for(&self, sender: u16) -> Vec<&LogEntry> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .filter(|((s, _), _)| *s == sender)
            .collect();
        entries.sort_by_key(|((_, phase), _)| phase.0);
        entries.into_iter().map(|(_, entry)| entry).collect()
    }

    /// A canonical, serializable snapshot of the whole log, for inclusion
    /// in a [`crate::messages::BlameMsg`]
    pub fn snapshot(&self) -> Vec<u8> {
        // `HashMap` iteration order is unspecified; sort for a deterministic
        // snapshot so two honest members computing a hash over it agree.
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by_key(|(k, _)| (*k).0);
        serde_json::to_vec(&entries).expect("log entries always serialize")
    }

    /// Re-verifies every entry in a snapshot produced by [`Self::snapshot`],
    /// looking up each entry's own sender's key through `sender_pub` — a
    /// submitter's log holds entries from every sender it heard from, not
    /// just its own, so there's no single key that covers the whole thing.
    /// Returns `false` on the first unresolvable sender or bad signature.
    pub fn verify_snapshot<E: Curve>(
        snapshot: &[u8],
        sender_pub: impl Fn(u16) -> Option<Point<E>>,
    ) -> bool
    where
    {
        let Ok(entries) = serde_json::from_slice::<Vec<((u16, PhaseKey), LogEntry)>>(snapshot)
        else {
            return false;
        };
        for ((sender, _), entry) in entries {
            let Some(pub_key) = sender_pub(sender) else {
                return false;
            };
            let Ok(signature) = serde_json::from_slice::<sign::Signature<E>>(&entry.signature_bytes)
            else {
                return false;
            };
            if !sign::verify(&pub_key, &entry.bytes, &signature) {
                return false;
            }
        }
        true
    }
}
