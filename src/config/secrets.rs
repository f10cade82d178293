//! Secret handling utilities.
//!
//! Re-exports secrecy types so call sites don't import the crate directly.

pub use secrecy::{ExposeSecret, SecretString};
