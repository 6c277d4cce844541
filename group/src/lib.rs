//! Static participant/group data model for the anonymous shuffle protocol
//!
//! This crate plays the role a settings/configuration collaborator would play in
//! a full deployment: it describes *who* takes part in a shuffle round and in
//! what order, but has no opinion on how that information was obtained (file,
//! network directory, hardcoded test fixture, ...). The shuffle protocol itself
//! lives in the `shuffle-core` crate.

#![warn(missing_docs)]

mod member;
mod valid;

pub use generic_ec;

pub use member::{MemberId, MemberInfo};
pub use valid::{Valid, Validate};

use generic_ec::Curve;

/// A group of participants taking part in one shuffle round
///
/// Members are indexed `0..n`; their position in [`Group::members`] *is* their
/// index and determines onion layer order. [`Group::shufflers`] names the
/// subset (and order) of members permitted to permute ciphertexts.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(bound = ""))]
pub struct Group<E: Curve> {
    /// All participants, in index order
    pub(crate) members: Vec<MemberInfo<E>>,
    /// Indices into `members`, in shuffle order
    pub(crate) shufflers: Vec<u16>,
}

/// Everything that can be wrong with a freshly constructed [`Group`]
#[derive(Debug, displaydoc::Display)]
#[cfg_attr(feature = "std", derive(thiserror::Error))]
pub enum InvalidGroup {
    /// group must have at least one member
    Empty,
    /// group has more than 65535 members, each member must fit in a `u16` index
    TooManyMembers,
    /// shuffler list is empty: at least one shuffler is required for the protocol to make progress
    NoShufflers,
    /// shuffler index {0} is out of range of the member list
    ShufflerOutOfRange(u16),
    /// shuffler index {0} appears more than once in the shuffler list
    DuplicateShuffler(u16),
}

impl<E: Curve> Group<E> {
    /// Constructs a group from a member list and an ordered shuffler subset
    ///
    /// `shufflers` holds indices into `members`, in the order shuffling is
    /// performed (shuffler `shufflers[0]` peels first).
    pub fn new(members: Vec<MemberInfo<E>>, shufflers: Vec<u16>) -> Result<Self, InvalidGroup> {
        if members.is_empty() {
            return Err(InvalidGroup::Empty);
        }
        if members.len() > usize::from(u16::MAX) {
            return Err(InvalidGroup::TooManyMembers);
        }
        if shufflers.is_empty() {
            return Err(InvalidGroup::NoShufflers);
        }
        let mut seen = vec![false; members.len()];
        for &s in &shufflers {
            let slot = seen
                .get_mut(usize::from(s))
                .ok_or(InvalidGroup::ShufflerOutOfRange(s))?;
            if *slot {
                return Err(InvalidGroup::DuplicateShuffler(s));
            }
            *slot = true;
        }
        Ok(Self { members, shufflers })
    }

    /// Number of members in the group
    pub fn size(&self) -> u16 {
        // `new` rejects groups larger than `u16::MAX`
        self.members.len() as u16
    }

    /// Number of shufflers, i.e. onion layer count
    pub fn shuffler_count(&self) -> u16 {
        self.shufflers.len() as u16
    }

    /// All members, in index order
    pub fn members(&self) -> &[MemberInfo<E>] {
        &self.members
    }

    /// Shuffler indices, in shuffle order
    pub fn shufflers(&self) -> &[u16] {
        &self.shufflers
    }

    /// `true` if member `i` is a shuffler
    pub fn is_shuffler(&self, i: u16) -> bool {
        self.shufflers.contains(&i)
    }

    /// This member's position in the shuffler order, if it's a shuffler
    pub fn shuffler_position(&self, i: u16) -> Option<u16> {
        self.shufflers
            .iter()
            .position(|&s| s == i)
            .map(|pos| pos as u16)
    }

    /// Info about member `i`, if it's in range
    pub fn member(&self, i: u16) -> Option<&MemberInfo<E>> {
        self.members.get(usize::from(i))
    }

    /// Iterates over all member indices `0..n`
    pub fn indices(&self) -> impl Iterator<Item = u16> + Clone {
        0..self.size()
    }
}

/// Identifies the local participant within a [`Group`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Local {
    /// This participant's index into [`Group::members`]
    pub index: u16,
}

impl Local {
    /// Whether the local participant is a shuffler in `group`
    pub fn is_shuffler<E: Curve>(&self, group: &Group<E>) -> bool {
        group.is_shuffler(self.index)
    }
}
