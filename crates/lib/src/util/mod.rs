//! Shared utilities.
//!
//! Hashing and the built-in word list, plus test helpers.

pub mod hash;
pub mod wordlist;

#[cfg(test)]
pub mod testutil;
