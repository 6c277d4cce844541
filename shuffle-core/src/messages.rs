//! The seven protocol message kinds, `spec.md` §3, plus the signed envelope
//! every one of them travels in
//!
//! Each payload type is a plain struct; [`Envelope`] is what actually
//! crosses the wire (via [`crate::codec`]) and what [`crate::transcript`]
//! indexes by `(sender, phase)`.

use generic_ec::{Curve, Point};
use serde::{Deserialize, Serialize};

use crate::crypto::sign::Signature;

/// Tags a message with the phase it belongs to; doubles as the wire
/// `phase_tag` byte (`spec.md` §6) and the transcript log's per-sender,
/// per-phase slot key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Phase {
    /// [`PublicKeysMsg`]
    PublicKeys = 0,
    /// [`DataMsg`]
    Data = 1,
    /// [`ShuffleMsg`]
    Shuffle = 2,
    /// [`EncryptedDataMsg`]
    EncryptedData = 3,
    /// [`GoNoGoMsg`]
    GoNoGo = 4,
    /// [`PrivateKeyMsg`]
    PrivateKey = 5,
    /// [`BlameMsg`]
    Blame = 6,
}

impl Phase {
    /// Decodes a wire `phase_tag` byte; `None` on an unknown tag, per
    /// `spec.md` §6 ("Unknown phase_tag ⇒ drop")
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0 => Self::PublicKeys,
            1 => Self::Data,
            2 => Self::Shuffle,
            3 => Self::EncryptedData,
            4 => Self::GoNoGo,
            5 => Self::PrivateKey,
            6 => Self::Blame,
            _ => return None,
        })
    }

    /// Encodes this phase as a wire `phase_tag` byte
    pub fn tag(self) -> u8 {
        self as u8
    }
}

/// Broadcast by every member at `KeySharing`: its inner and outer public keys
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct PublicKeysMsg<E: Curve> {
    /// This member's inner public key
    pub inner_pub: Point<E>,
    /// This member's outer public key
    pub outer_pub: Point<E>,
}

/// Sent by every member to `shuffler[0]` at `DataSubmission`: the fully
/// onion-wrapped ciphertext
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataMsg {
    /// `outer_encrypt(..)` output, `spec.md` §4.2
    pub ciphertext: Vec<u8>,
}

/// Sent by shuffler `k` to shuffler `k+1`: one layer peeled, order permuted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShuffleMsg {
    /// Permuted, one-layer-decrypted ciphertexts
    pub ciphertexts: Vec<Vec<u8>>,
}

/// Broadcast by the last shuffler: the final ciphertext multiset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedDataMsg {
    /// Fully-peeled ciphertexts, each still wrapping an inner layer
    pub ciphertexts: Vec<Vec<u8>>,
}

/// Broadcast by every member at `Verification`: its view of the transcript
/// hash plus a go/no-go verdict
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GoNoGoMsg {
    /// This member's computed transcript hash
    pub transcript_hash: [u8; 32],
    /// `true` = go, `false` = no-go
    pub go: bool,
}

/// Broadcast by every member at `PrivateKeySharing`: its inner private key,
/// serialized big-endian
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivateKeyMsg {
    /// Big-endian-encoded inner private scalar
    pub inner_secret_bytes: Vec<u8>,
}

/// Broadcast by every member on entry to `Blame`: its signed transcript log
/// plus its outer private key, disclosed for replay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlameMsg {
    /// Canonical, signed snapshot of the sender's transcript log
    pub log_snapshot: Vec<u8>,
    /// Big-endian-encoded outer private scalar
    pub outer_secret_bytes: Vec<u8>,
}

/// One payload type per [`Phase`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum Payload<E: Curve> {
    /// See [`PublicKeysMsg`]
    PublicKeys(PublicKeysMsg<E>),
    /// See [`DataMsg`]
    Data(DataMsg),
    /// See [`ShuffleMsg`]
    Shuffle(ShuffleMsg),
    /// See [`EncryptedDataMsg`]
    EncryptedData(EncryptedDataMsg),
    /// See [`GoNoGoMsg`]
    GoNoGo(GoNoGoMsg),
    /// See [`PrivateKeyMsg`]
    PrivateKey(PrivateKeyMsg),
    /// See [`BlameMsg`]
    Blame(BlameMsg),
}

impl<E: Curve> Payload<E> {
    /// The [`Phase`] this payload belongs to
    pub fn phase(&self) -> Phase {
        match self {
            Self::PublicKeys(_) => Phase::PublicKeys,
            Self::Data(_) => Phase::Data,
            Self::Shuffle(_) => Phase::Shuffle,
            Self::EncryptedData(_) => Phase::EncryptedData,
            Self::GoNoGo(_) => Phase::GoNoGo,
            Self::PrivateKey(_) => Phase::PrivateKey,
            Self::Blame(_) => Phase::Blame,
        }
    }
}

/// What actually crosses the wire: a payload plus the fields `spec.md` §3
/// says the signature covers, plus the signature itself
///
/// `spec.md` §4.3: "signature covers the canonical encoding of payload +
/// round identifier + phase tag."
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Envelope<E: Curve> {
    /// Identifies the round this message belongs to; messages for a
    /// different round are dropped by the codec
    pub round_id: [u8; 32],
    /// Index of the member that produced this message
    pub sender_index: u16,
    /// The message content
    pub payload: Payload<E>,
    /// Signature over [`signed_bytes`] under the sender's outer public key
    pub signature: Signature<E>,
}

/// Canonical bytes the envelope's signature is computed/verified over:
/// `round_id ‖ phase_tag ‖ sender_index ‖ payload` in that order, with
/// `payload` encoded via [`crate::codec::encode_payload`]
pub fn signed_bytes<E: Curve>(round_id: &[u8; 32], sender_index: u16, payload: &Payload<E>) -> Vec<u8>
where
    Payload<E>: Serialize,
{
    let mut buf = Vec::new();
    buf.extend_from_slice(round_id);
    buf.push(payload.phase().tag());
    buf.extend_from_slice(&sender_index.to_be_bytes());
    buf.extend_from_slice(
        &crate::codec::encode_payload(payload).expect("payload serialization never fails"),
    );
    buf
}
