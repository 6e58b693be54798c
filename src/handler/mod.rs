//! Per-ecosystem caching policy (`spec.md` §4.5).

pub mod maven;
pub mod npm;
pub mod passthrough;

use crate::catalogue::Catalogue;
use crate::error::HandlerError;
use crate::fetcher::UpstreamFetcher;
use crate::mirror::{EcosystemType, Mirror};
use crate::request::RequestContext;
use ahash::AHashMap;
use async_trait::async_trait;
use std::sync::Arc;

/// Telemetry-only classification of a request within its ecosystem
/// (`spec.md` §4.5.1) — logged, never branched on for behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    PyPiWheel,
    PyPiSdist,
    PyPiSimpleIndex,
    RubyGem,
    RubyGemSpec,
    CargoCrate,
    CargoIndex,
    CargoDl,
    CondaRepodata,
    CondaPackage,
    GoList,
    GoInfo,
    GoMod,
    GoZip,
    GoLatest,
    CranPackages,
    CranArchive,
    DockerManifest,
    DockerBlob,
    DockerCatalog,
    MavenNormal,
    MavenSnapshot,
    MavenMetadata,
    NpmMetadata,
    NpmTarball,
    Unclassified,
}

/// Dependencies a handler needs to serve a request, bundled so `Dispatcher`
/// can hand over one value instead of four (`spec.md` §9: process-wide state
/// constructed once, passed explicitly, not reached via ambient singletons).
pub struct HandlerContext {
    pub catalogue: Arc<dyn Catalogue>,
    pub blob_store: crate::blob_store::BlobStore,
    pub fetcher: Arc<dyn UpstreamFetcher>,
}

#[async_trait]
pub trait Handler: Send + Sync {
    fn supported_type(&self) -> EcosystemType;

    async fn handle(
        &self,
        ctx: &HandlerContext,
        request: &mut dyn RequestContext,
        mirror: &Mirror,
        relative_path: &str,
    ) -> Result<(), HandlerError>;

    async fn cleanup_cache(&self, ctx: &HandlerContext, mirror: &Mirror) -> Result<(), HandlerError>;
}

/// Maps ecosystem tag to handler implementation; one instance per process
/// (`spec.md` §4.5's "Handler Registry").
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: AHashMap<EcosystemType, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.insert(handler.supported_type(), handler);
    }

    pub fn get(&self, ecosystem: EcosystemType) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&ecosystem).cloned()
    }

    /// Builds the standard registry: NPM and Maven get their caching
    /// handlers, everything else gets the shared passthrough handler.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(npm::NpmHandler::default()));
        registry.register(Arc::new(maven::MavenHandler::default()));
        for ecosystem in [
            EcosystemType::PyPI,
            EcosystemType::R,
            EcosystemType::RubyGems,
            EcosystemType::Cargo,
            EcosystemType::Conda,
            EcosystemType::Go,
            EcosystemType::Docker,
        ] {
            registry.register(Arc::new(passthrough::PassthroughHandler::new(ecosystem)));
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_defaults_covers_every_ecosystem() {
        let registry = HandlerRegistry::with_defaults();
        for ecosystem in [
            EcosystemType::Npm,
            EcosystemType::Maven,
            EcosystemType::PyPI,
            EcosystemType::R,
            EcosystemType::RubyGems,
            EcosystemType::Cargo,
            EcosystemType::Conda,
            EcosystemType::Go,
            EcosystemType::Docker,
        ] {
            assert!(registry.get(ecosystem).is_some(), "missing handler for {ecosystem}");
        }
    }
}
