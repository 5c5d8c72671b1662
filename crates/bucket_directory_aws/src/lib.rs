//! AWS adapters, handlers and binaries for directory-to-bucket sync.
//!
//! `bucket_directory_core` owns the archive format, the lifecycle state
//! machine and the executor ports. This crate binds those ports to S3, Lambda
//! and ECS, and hosts the code that runs on the far side of an executor call
//! (the apply handler) plus the stateless local strategies.

pub mod adapters;
pub mod error;
pub mod handlers;
pub mod logging;
