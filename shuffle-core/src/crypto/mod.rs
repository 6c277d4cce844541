//! Cryptographic pipeline: pure, stateless operations over byte strings
//!
//! Nothing in this module touches network or round state; it's the
//! per-phase glue `spec.md` §4.2 describes: outer-encrypt, peel, the
//! transcript hash, inner-decrypt, plus [`sign`] for the signature every
//! message carries.

pub mod keys;
pub mod onion;
pub mod sign;

use generic_ec::Curve;
use sha2::Sha256;

use crate::messages::PublicKeysMsg;

/// `H(pub_inner[0]‖pub_outer[0]‖data[0]‖…)` in member order
///
/// `spec.md` §3: "every honest peer computes the same value." Built as a
/// tagged [`udigest::Digestable`] struct rather than bespoke concatenation,
/// so the hash is unambiguous across message boundaries.
#[derive(udigest::Digestable)]
#[udigest(tag = "dissent.shuffle.transcript_entry")]
#[udigest(bound = "")]
struct TranscriptEntry<'a, E: Curve> {
    inner_pub: generic_ec::Point<E>,
    outer_pub: generic_ec::Point<E>,
    #[udigest(as_bytes)]
    data: &'a [u8],
}

pub fn hash_transcript<E: Curve>(keys: &[PublicKeysMsg<E>], data: &[Vec<u8>]) -> [u8; 32] {
    let entries = keys.iter().zip(data.iter()).map(|(k, d)| TranscriptEntry {
        inner_pub: k.inner_pub,
        outer_pub: k.outer_pub,
        data: d.as_slice(),
    });
    let digest: digest::Output<Sha256> = udigest::hash_iter::<Sha256>(entries);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Generic digest helper used to derive symmetric keys from an ECDH shared
/// secret (see [`onion`])
pub(crate) fn kdf(context: &'static [u8], shared_secret: &[u8], out: &mut [u8]) {
    use hmac::{Hmac, Mac};
    type HmacSha256 = Hmac<Sha256>;

    let mut mac = <HmacSha256 as Mac>::new_from_slice(context).expect("hmac accepts any key length");
    mac.update(shared_secret);
    let tag = mac.finalize().into_bytes();
    let n = out.len().min(tag.len());
    out[..n].copy_from_slice(&tag[..n]);
}
