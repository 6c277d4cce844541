//! Wire-level framing, `spec.md` §4.3/§6
//!
//! Canonical encoding is length-prefixed fields in fixed order:
//! `round_id: 32B, phase_tag: 1B, sender_index: varint (here: u16 BE),
//! payload_len: u32, payload_bytes, sig_len: u32, sig_bytes`. Payload and
//! signature bytes are themselves `serde_json`-encoded, mirroring how the
//! teacher protocol treats its own wire messages as opaque signed blobs
//! rather than hand-rolling a binary payload format per message kind.

use generic_ec::Curve;
use generic_ec::Scalar;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::messages::{Envelope, Payload};

/// Something went wrong decoding a wire envelope
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// buffer is truncated or otherwise malformed
    #[error("malformed envelope")]
    Malformed,
    /// phase_tag is not one of the known phases
    #[error("unknown phase tag {0}")]
    UnknownPhase(u8),
    /// payload or signature failed to deserialize
    #[error("corrupt field: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub(crate) fn encode_payload<E: Curve>(payload: &Payload<E>) -> Result<Vec<u8>, serde_json::Error>
where
    Payload<E>: Serialize,
{
    serde_json::to_vec(payload)
}

/// Encodes a full envelope to the canonical wire form
pub fn encode<E: Curve>(envelope: &Envelope<E>) -> Vec<u8>
where
    Payload<E>: Serialize,
    crate::crypto::sign::Signature<E>: Serialize,
{
    let payload_bytes =
        encode_payload(&envelope.payload).expect("payload serialization never fails");
    let sig_bytes =
        serde_json::to_vec(&envelope.signature).expect("signature serialization never fails");

    let mut out = Vec::with_capacity(32 + 1 + 2 + 4 + payload_bytes.len() + 4 + sig_bytes.len());
    out.extend_from_slice(&envelope.round_id);
    out.push(envelope.payload.phase().tag());
    out.extend_from_slice(&envelope.sender_index.to_be_bytes());
    out.extend_from_slice(&(payload_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&payload_bytes);
    out.extend_from_slice(&(sig_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&sig_bytes);
    out
}

/// Decodes a wire envelope
///
/// Per `spec.md` §6: an unknown `phase_tag` or a truncated buffer both
/// result in the message being dropped (`Err`, never a panic); the caller
/// is expected to silently discard on error, per `spec.md` §7's
/// `MalformedMessage` handling.
pub fn decode<E>(bytes: &[u8]) -> Result<Envelope<E>, DecodeError>
where
    E: Curve,
    Payload<E>: DeserializeOwned,
    crate::crypto::sign::Signature<E>: DeserializeOwned,
{
    let mut pos = 0usize;

    let round_id = take(bytes, &mut pos, 32)?;
    let round_id: [u8; 32] = round_id.try_into().map_err(|_| DecodeError::Malformed)?;

    let phase_tag_bytes = take(bytes, &mut pos, 1)?;
    let phase_tag = phase_tag_bytes[0];
    crate::messages::Phase::from_tag(phase_tag).ok_or(DecodeError::UnknownPhase(phase_tag))?;

    let sender_index_bytes = take(bytes, &mut pos, 2)?;
    let sender_index = u16::from_be_bytes(
        sender_index_bytes
            .try_into()
            .expect("exactly 2 bytes requested"),
    );

    let payload_len = take_u32(bytes, &mut pos)?;
    let payload_bytes = take(bytes, &mut pos, payload_len as usize)?;
    let payload: Payload<E> = serde_json::from_slice(payload_bytes)?;

    let sig_len = take_u32(bytes, &mut pos)?;
    let sig_bytes = take(bytes, &mut pos, sig_len as usize)?;
    let signature = serde_json::from_slice(sig_bytes)?;

    Ok(Envelope {
        round_id,
        sender_index,
        payload,
        signature,
    })
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, n: usize) -> Result<&'a [u8], DecodeError> {
    let end = pos.checked_add(n).ok_or(DecodeError::Malformed)?;
    let slice = bytes.get(*pos..end).ok_or(DecodeError::Malformed)?;
    *pos = end;
    Ok(slice)
}

fn take_u32(bytes: &[u8], pos: &mut usize) -> Result<u32, DecodeError> {
    let slice = take(bytes, pos, 4)?;
    Ok(u32::from_be_bytes(slice.try_into().expect("exactly 4 bytes requested")))
}
