//! Domain value types for the relay broker.
//!
//! Nothing in here performs I/O or sleeps.  Timing concerns such as the
//! artificial login delay live in the broker crate; this module only knows
//! how to turn a clear-text password into something safe to keep around.

/// One-way password digests.
///
/// See [`password::PasswordDigest`] for the main type.
pub mod password;
