//! Metadata service client.
//!
//! Turns an external AniList identifier into the display titles the source
//! adapters search with.

pub mod client;
pub mod types;

pub use client::{AniListClient, MetadataResolver};
pub use types::*;
