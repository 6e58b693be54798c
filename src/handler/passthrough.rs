//! Zero-caching handler for PyPI, CRAN/R, RubyGems, Cargo, Conda, Go, Docker
//! (`spec.md` §4.5.1).

use super::{Handler, HandlerContext, RequestKind};
use crate::error::HandlerError;
use crate::mirror::{EcosystemType, Mirror};
use crate::request::RequestContext;
use async_trait::async_trait;

const TARGET: &str = "regmirror::handler::passthrough";

pub struct PassthroughHandler {
    ecosystem: EcosystemType,
}

impl PassthroughHandler {
    pub fn new(ecosystem: EcosystemType) -> Self {
        Self { ecosystem }
    }

    /// Classifies `relative_path` for telemetry only; never affects behaviour.
    fn classify(&self, relative_path: &str) -> RequestKind {
        match self.ecosystem {
            EcosystemType::PyPI => {
                if relative_path.starts_with("simple/") || relative_path == "simple" {
                    RequestKind::PyPiSimpleIndex
                } else if relative_path.ends_with(".whl") {
                    RequestKind::PyPiWheel
                } else {
                    RequestKind::PyPiSdist
                }
            }
            EcosystemType::RubyGems => {
                if relative_path.ends_with(".gemspec.rz") {
                    RequestKind::RubyGemSpec
                } else {
                    RequestKind::RubyGem
                }
            }
            EcosystemType::Cargo => {
                if relative_path.starts_with("api/v1/crates") {
                    RequestKind::CargoDl
                } else if relative_path.contains('/') && !relative_path.contains('.') {
                    RequestKind::CargoIndex
                } else {
                    RequestKind::CargoCrate
                }
            }
            EcosystemType::Conda => {
                if relative_path.ends_with("repodata.json") || relative_path.ends_with("repodata.json.bz2") {
                    RequestKind::CondaRepodata
                } else {
                    RequestKind::CondaPackage
                }
            }
            EcosystemType::Go => {
                if relative_path.ends_with("@latest") {
                    RequestKind::GoLatest
                } else if relative_path.ends_with("@v/list") {
                    RequestKind::GoList
                } else if relative_path.ends_with(".info") {
                    RequestKind::GoInfo
                } else if relative_path.ends_with(".mod") {
                    RequestKind::GoMod
                } else if relative_path.ends_with(".zip") {
                    RequestKind::GoZip
                } else {
                    RequestKind::Unclassified
                }
            }
            EcosystemType::R => {
                if relative_path.starts_with("src/contrib/PACKAGES") {
                    RequestKind::CranPackages
                } else {
                    RequestKind::CranArchive
                }
            }
            EcosystemType::Docker => {
                if relative_path.contains("/manifests/") {
                    RequestKind::DockerManifest
                } else if relative_path.contains("/blobs/") {
                    RequestKind::DockerBlob
                } else if relative_path == "v2/_catalog" {
                    RequestKind::DockerCatalog
                } else {
                    RequestKind::Unclassified
                }
            }
            _ => RequestKind::Unclassified,
        }
    }
}

#[async_trait]
impl Handler for PassthroughHandler {
    fn supported_type(&self) -> EcosystemType {
        self.ecosystem
    }

    async fn handle(
        &self,
        ctx: &HandlerContext,
        request: &mut dyn RequestContext,
        mirror: &Mirror,
        relative_path: &str,
    ) -> Result<(), HandlerError> {
        let kind = self.classify(relative_path);
        tracing::debug!(target: TARGET, mirror = mirror.name, relative_path, ?kind, "passthrough");

        let response = ctx
            .fetcher
            .fetch(mirror, relative_path, request.headers())
            .await?;

        request.respond(response.status, response.headers, response.body.to_vec());
        Ok(())
    }

    /// No cache state to purge — passthrough never writes to the catalogue or
    /// blob store.
    async fn cleanup_cache(&self, _ctx: &HandlerContext, _mirror: &Mirror) -> Result<(), HandlerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_pypi_wheel_vs_sdist() {
        let h = PassthroughHandler::new(EcosystemType::PyPI);
        assert_eq!(h.classify("packages/foo-1.0-py3-none-any.whl"), RequestKind::PyPiWheel);
        assert_eq!(h.classify("packages/foo-1.0.tar.gz"), RequestKind::PyPiSdist);
        assert_eq!(h.classify("simple/foo/"), RequestKind::PyPiSimpleIndex);
    }

    #[test]
    fn classifies_go_module_paths() {
        let h = PassthroughHandler::new(EcosystemType::Go);
        assert_eq!(h.classify("github.com/foo/bar/@v/list"), RequestKind::GoList);
        assert_eq!(h.classify("github.com/foo/bar/@v/v1.0.0.info"), RequestKind::GoInfo);
        assert_eq!(h.classify("github.com/foo/bar/@latest"), RequestKind::GoLatest);
    }

    #[test]
    fn classifies_docker_paths() {
        let h = PassthroughHandler::new(EcosystemType::Docker);
        assert_eq!(h.classify("v2/library/foo/manifests/latest"), RequestKind::DockerManifest);
        assert_eq!(h.classify("v2/library/foo/blobs/sha256:abc"), RequestKind::DockerBlob);
    }
}
