//! Keeps an S3 bucket's contents equal to a local directory.
//!
//! A directory is packed into a deterministic archive ([`archive`]), staged in
//! the target bucket ([`store`]) and expanded remotely by a [`executor`]
//! backend. The [`lifecycle`] controller drives Create / Update / Delete
//! transitions and persists what was last applied ([`state`]) so repeated runs
//! with unchanged content are no-ops.
//!
//! This crate carries no cloud SDK; concrete adapters implement the narrow
//! ports in [`executor`] and [`store`].

pub mod archive;
pub mod config;
pub mod contract;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod state;
pub mod storage_keys;
pub mod store;
pub mod strategy;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;
