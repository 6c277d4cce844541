//! Long-lived key pairs a member holds for the round
//!
//! `spec.md` §3: each member holds an outer key pair (used to peel one onion
//! layer, disclosed during blame) and an inner key pair (used to encrypt its
//! own payload, never disclosed). The outer key pair additionally signs
//! every message the member sends: `spec.md` doesn't name a third signing
//! key, and the outer key is the one piece of key material the protocol
//! already plans to make public during blame, so reusing it avoids a key the
//! spec never asked for. See `DESIGN.md` for this decision.

use generic_ec::{Curve, NonZero, Point, SecretScalar};
use rand_core::{CryptoRng, RngCore};

use crate::error::Bug;

/// An outer key pair: peels onion layers, signs messages, is disclosed
/// during blame
#[derive(Clone)]
pub struct OuterKeyPair<E: Curve> {
    /// Private scalar; zeroed by `Round` on entry to `Finished`, broadcast
    /// and then zeroed on entry to `Blame`
    pub secret: NonZero<SecretScalar<E>>,
    /// Public point, shared with every member during `KeySharing`
    pub public: NonZero<Point<E>>,
}

/// An inner key pair: encrypts this member's own payload, never disclosed
#[derive(Clone)]
pub struct InnerKeyPair<E: Curve> {
    /// Private scalar; destroyed on entry to `Finished`
    pub secret: NonZero<SecretScalar<E>>,
    /// Public point, shared with every member during `KeySharing`
    pub public: NonZero<Point<E>>,
}

impl<E: Curve> OuterKeyPair<E> {
    /// Samples a fresh outer key pair
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self, Bug> {
        let secret = NonZero::<SecretScalar<E>>::random(rng);
        let public =
            NonZero::from_point(Point::<E>::generator() * AsRef::<generic_ec::Scalar<E>>::as_ref(&secret)).ok_or(Bug::key_generation())?;
        Ok(Self { secret, public })
    }

    /// Wraps an externally supplied outer key (testing / forensic replay)
    pub fn from_secret(secret: NonZero<SecretScalar<E>>) -> Result<Self, Bug> {
        let public =
            NonZero::from_point(Point::<E>::generator() * AsRef::<generic_ec::Scalar<E>>::as_ref(&secret)).ok_or(Bug::key_generation())?;
        Ok(Self { secret, public })
    }
}

impl<E: Curve> InnerKeyPair<E> {
    /// Samples a fresh inner key pair
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self, Bug> {
        let secret = NonZero::<SecretScalar<E>>::random(rng);
        let public =
            NonZero::from_point(Point::<E>::generator() * AsRef::<generic_ec::Scalar<E>>::as_ref(&secret)).ok_or(Bug::key_generation())?;
        Ok(Self { secret, public })
    }
}

impl Bug {
    pub(crate) fn key_generation() -> Self {
        Self::from(crate::error::BugReason::KeyGeneration)
    }
}
