//! Core of a multi-ecosystem package-registry caching reverse proxy:
//! routing, per-ecosystem caching policy, a persisted catalogue, on-disk blob
//! storage, and size-bounded eviction. The embedded HTTP server, the
//! administrative CRUD surface for mirrors, and process bootstrap are
//! external collaborators — see [`request`] and [`config`] for the seams.

pub mod blob_store;
pub mod catalogue;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod eviction;
pub mod fetcher;
pub mod handler;
pub mod logging;
pub mod mirror;
pub mod mirror_index;
pub mod request;

pub use error::RegMirrorError;
pub use mirror::{EcosystemType, Mirror};
