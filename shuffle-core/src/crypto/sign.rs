//! Signatures over canonical message bytes
//!
//! A signature here is a Schnorr proof of knowledge of the signer's outer
//! private key, Fiat-Shamir'd over the message bytes instead of a session
//! id, bundling the prover's commitment alongside the proof since there's no
//! earlier round to carry it the way an interactive proof-of-knowledge
//! round would. This reuses `generic_ec_zkp::schnorr_pok`, the same
//! building block the teacher protocol already imports for its own Schnorr
//! proofs of knowledge (`cggmp21-keygen`), rather than pulling in an
//! unrelated signature crate for a primitive this pipeline already has the
//! pieces for.

use digest::Digest;
use generic_ec::{Curve, NonZero, Point, Scalar, SecretScalar};
use generic_ec_zkp::schnorr_pok::{self, Challenge};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

/// A detached signature over some canonical message bytes
#[derive(Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Signature<E: Curve> {
    commitment: schnorr_pok::Commit<E>,
    proof: schnorr_pok::Proof<E>,
}

impl<E: Curve> core::fmt::Debug for Signature<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Signature").finish_non_exhaustive()
    }
}

fn challenge<E: Curve>(commitment: &schnorr_pok::Commit<E>, message: &[u8]) -> Challenge<E>
where
{
    let mut hasher = Sha256::new();
    hasher.update(commitment.0.to_bytes(true).as_bytes());
    hasher.update(message);
    let nonce = Scalar::from_be_bytes_mod_order(hasher.finalize());
    Challenge { nonce }
}

/// Signs `message` with `secret`
pub fn sign<E: Curve, R: rand_core::RngCore + rand_core::CryptoRng>(
    secret: &NonZero<SecretScalar<E>>,
    message: &[u8],
    rng: &mut R,
) -> Signature<E>
where
{
    let (sch_secret, commitment) = schnorr_pok::prover_commits_ephemeral_secret::<E, _>(rng);
    let ch = challenge(&commitment, message);
    let proof = schnorr_pok::prove(&sch_secret, &ch, secret);
    Signature { commitment, proof }
}

/// Verifies `signature` over `message` against `signer`'s outer public key
pub fn verify<E: Curve>(signer: &Point<E>, message: &[u8], signature: &Signature<E>) -> bool
where
{
    let ch = challenge(&signature.commitment, message);
    signature
        .proof
        .verify(&signature.commitment, &ch, signer)
        .is_ok()
}
