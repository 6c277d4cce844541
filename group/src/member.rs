use generic_ec::{Curve, Point};

/// Externally-assigned public identifier of a member
///
/// Opaque to the protocol itself; used only so logs and blame sets can name a
/// member without leaking the local `u16` index into contexts that shouldn't
/// assume one canonical ordering (e.g. when a blame set is displayed to a
/// human operator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct MemberId(#[cfg_attr(feature = "serde", serde(with = "hex::serde"))] pub [u8; 32]);

impl MemberId {
    /// Wraps raw bytes as a member identifier
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw bytes of the identifier
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Everything the group data model knows about one member
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(bound = ""))]
pub struct MemberInfo<E: Curve> {
    /// Externally-assigned public identifier
    pub id: MemberId,
    /// Inner public key: used by every member to encrypt its payload, revealed
    /// only after shuffling completes
    pub inner_pub: Point<E>,
    /// Outer public key: used by shufflers to peel one onion layer
    pub outer_pub: Point<E>,
}

impl<E: Curve> MemberInfo<E> {
    /// Constructs a member record from its identifier and public keys
    pub fn new(id: MemberId, inner_pub: Point<E>, outer_pub: Point<E>) -> Self {
        Self {
            id,
            inner_pub,
            outer_pub,
        }
    }
}
