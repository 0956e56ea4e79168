//! Linear issue tracker: types, GraphQL client and caching wrapper.

pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
pub mod fixture;
pub mod source;
pub mod types;

pub use cached_client::{CachedIssueSource, SourceTtls};
pub use client::LinearClient;
pub use fixture::StaticSource;
pub use source::IssueSource;
