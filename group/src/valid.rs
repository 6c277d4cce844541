use core::ops::Deref;

use generic_ec::Curve;

/// A value that has passed [`Validate::validate`] and is now known-good
///
/// Mirrors the pattern the wider protocol uses for any value whose invariants
/// are expensive or unsafe to re-check on every use (e.g. a freshly
/// constructed [`crate::Group`]): validate once at the boundary, then pass
/// `Valid<T>` around and trust it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Valid<T>(T);

impl<T> Valid<T> {
    /// Wraps `value` as valid without checking it
    ///
    /// Only for constructing test fixtures or values derived from an already
    /// validated one. Prefer [`Validate::validate`].
    pub fn assume_valid(value: T) -> Self {
        Self(value)
    }

    /// Unwraps back into the plain value
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for Valid<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

/// Values whose invariants can be checked once and then relied upon
pub trait Validate: Sized {
    /// What can be wrong with `Self`
    type Error;

    /// Checks `self`'s invariants, wrapping it as [`Valid`] if they hold
    fn validate(self) -> Result<Valid<Self>, Self::Error>;
}

impl<E: Curve> Validate for crate::Group<E> {
    type Error = crate::InvalidGroup;

    fn validate(self) -> Result<Valid<Self>, Self::Error> {
        // `Group::new` already enforces every invariant at construction time;
        // `validate` exists so callers that receive a `Group` from elsewhere
        // (e.g. deserialized from the config loader) have the same boundary
        // check as callers that build one directly.
        Self::new(self.members, self.shufflers).map(Valid::assume_valid)
    }
}
