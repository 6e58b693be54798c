//! Eviction Engine: the administrative trigger that invokes each handler's
//! `cleanup_cache` (`spec.md` §4.7). The per-ecosystem eviction policy itself
//! lives on the handler (mirroring the source's `CleanupCache` methods on
//! each `*Handler`); this module is the entry point an admin caller reaches
//! for, not a second copy of the policy.

use crate::error::{DispatchError, HandlerError};
use crate::handler::{HandlerContext, HandlerRegistry};
use crate::mirror_index::MirrorIndex;
use std::sync::Arc;

const TARGET: &str = "regmirror::eviction";

pub struct EvictionEngine {
    mirror_index: Arc<MirrorIndex>,
    registry: Arc<HandlerRegistry>,
    ctx: Arc<HandlerContext>,
}

impl EvictionEngine {
    pub fn new(mirror_index: Arc<MirrorIndex>, registry: Arc<HandlerRegistry>, ctx: Arc<HandlerContext>) -> Self {
        Self {
            mirror_index,
            registry,
            ctx,
        }
    }

    /// Runs `cleanup_cache` for one mirror by id.
    pub async fn run_one(&self, mirror_id: i64) -> Result<(), DispatchError> {
        let mirror = self.mirror_index.get(mirror_id).ok_or(DispatchError::MirrorNotFound)?;
        let handler = self
            .registry
            .get(mirror.ecosystem)
            .ok_or(DispatchError::UnsupportedType)?;

        tracing::info!(target: TARGET, mirror = mirror.name, "running eviction");
        handler
            .cleanup_cache(&self.ctx, &mirror)
            .await
            .map_err(DispatchError::from)?;
        Ok(())
    }

    /// Runs `cleanup_cache` across every registered mirror, logging and
    /// continuing past any single mirror's failure — eviction is best-effort
    /// housekeeping, not a request that owes a client a response.
    pub async fn run_all(&self) -> Vec<(i64, Result<(), HandlerError>)> {
        let mut results = Vec::new();
        for mirror in self.mirror_index.get_all() {
            let Some(handler) = self.registry.get(mirror.ecosystem) else {
                continue;
            };
            let result = handler.cleanup_cache(&self.ctx, &mirror).await;
            if let Err(ref e) = result {
                tracing::warn!(target: TARGET, mirror = mirror.name, error = %e, "eviction failed");
            }
            results.push((mirror.id, result));
        }
        results
    }
}
