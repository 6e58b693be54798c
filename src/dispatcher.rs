//! Resolves mirror by path, invokes the handler, updates counters
//! (`spec.md` §4.6).

use crate::error::DispatchError;
use crate::handler::{HandlerContext, HandlerRegistry};
use crate::mirror_index::MirrorIndex;
use crate::request::RequestContext;
use chrono::Utc;
use std::sync::Arc;

const TARGET: &str = "regmirror::dispatcher";

pub struct Dispatcher {
    mirror_index: Arc<MirrorIndex>,
    registry: Arc<HandlerRegistry>,
    ctx: Arc<HandlerContext>,
}

impl Dispatcher {
    pub fn new(mirror_index: Arc<MirrorIndex>, registry: Arc<HandlerRegistry>, ctx: Arc<HandlerContext>) -> Self {
        Self {
            mirror_index,
            registry,
            ctx,
        }
    }

    /// `spec.md` §4.6 steps 1-5. `path` is the full inbound request path,
    /// leading/trailing slashes insignificant.
    pub async fn dispatch(&self, request: &mut dyn RequestContext, path: &str) -> Result<(), DispatchError> {
        let (mirror, relative_path) = self
            .mirror_index
            .resolve(path)
            .ok_or(DispatchError::MirrorNotFound)?;

        let handler = self
            .registry
            .get(mirror.ecosystem)
            .ok_or(DispatchError::UnsupportedType)?;

        tracing::debug!(target: TARGET, mirror = mirror.name, relative_path, "dispatching");
        handler.handle(&self.ctx, request, &mirror, &relative_path).await?;

        let now = Utc::now();
        if let Err(e) = self.ctx.catalogue.touch_mirror_last_used(mirror.id, now).await {
            tracing::warn!(target: TARGET, error = %e, "last_used_time persist failed");
        }
        self.mirror_index.set(mirror_with_last_used(&mirror, now));

        Ok(())
    }
}

/// Clones `mirror` with `last_used_time` bumped, for re-insertion into the
/// in-memory index (`spec.md` §4.6 step 5: both the catalogue row and the
/// in-memory copy are updated).
fn mirror_with_last_used(mirror: &crate::mirror::Mirror, now: chrono::DateTime<Utc>) -> crate::mirror::Mirror {
    let mut updated = mirror.clone();
    updated.last_used_time = Some(now);
    updated.updated_at = now;
    updated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::BlobStore;
    use crate::catalogue::sqlite::SqliteCatalogue;
    use crate::catalogue::Catalogue;
    use crate::fetcher::UpstreamFetcher;
    use crate::handler::HandlerRegistry;
    use crate::mirror::EcosystemType;
    use crate::request::OwnedRequestContext;
    use async_trait::async_trait;
    use reqwest::header::HeaderMap;
    use sqlx::sqlite::SqlitePoolOptions;

    struct StubFetcher;

    #[async_trait]
    impl UpstreamFetcher for StubFetcher {
        async fn fetch(
            &self,
            _mirror: &crate::mirror::Mirror,
            _relative_path: &str,
            _inbound_headers: &HeaderMap,
        ) -> Result<crate::fetcher::FetchedResponse, crate::error::FetchError> {
            Ok(crate::fetcher::FetchedResponse {
                status: 200,
                headers: HeaderMap::new(),
                body: bytes::Bytes::from_static(b"{}"),
            })
        }
    }

    async fn test_dispatcher() -> (Dispatcher, i64) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let catalogue = SqliteCatalogue::from_pool(pool);
        catalogue.run_migrations().await.unwrap();

        let now = Utc::now();
        let mut mirror = crate::mirror::Mirror {
            id: 0,
            name: "npm".into(),
            ecosystem: EcosystemType::Npm,
            upstream_url: "https://registry.npmjs.org".into(),
            use_proxy: false,
            proxy_url: None,
            access_url: "/npm".into(),
            service_url: "https://proxy.example.com".into(),
            blob_path: std::env::temp_dir().join("regmirror-test-npm"),
            max_size: 1_000_000,
            cache_time_minutes: 10,
            last_used_time: None,
            created_at: now,
            updated_at: now,
            last_cleanup: None,
            request_count: 0,
            hit_count: 0,
        };
        let id = catalogue.upsert_mirror(&mirror).await.unwrap();
        mirror.id = id;

        let mirror_index = Arc::new(MirrorIndex::new());
        mirror_index.set(mirror);

        let registry = Arc::new(HandlerRegistry::with_defaults());
        let ctx = Arc::new(HandlerContext {
            catalogue: Arc::new(catalogue),
            blob_store: BlobStore::new(),
            fetcher: Arc::new(StubFetcher),
        });

        (Dispatcher::new(mirror_index, registry, ctx), id)
    }

    #[tokio::test]
    async fn unknown_prefix_yields_mirror_not_found() {
        let (dispatcher, _id) = test_dispatcher().await;
        let mut ctx = OwnedRequestContext::get(HeaderMap::new());
        let err = dispatcher.dispatch(&mut ctx, "/unknown/path").await.unwrap_err();
        assert!(matches!(err, DispatchError::MirrorNotFound));
    }

    #[tokio::test]
    async fn known_prefix_dispatches_to_handler() {
        let (dispatcher, _id) = test_dispatcher().await;
        let mut ctx = OwnedRequestContext::get(HeaderMap::new());
        dispatcher.dispatch(&mut ctx, "/npm/left-pad").await.unwrap();
        assert_eq!(ctx.response.unwrap().status, 200);
    }
}
