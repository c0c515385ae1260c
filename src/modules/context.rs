//! Everything a module needs, passed explicitly

use crate::api::{ApiError, ContentApi};
use crate::batch::BatchOrchestrator;
use crate::clock::MigrationClock;
use crate::config::MigrationConfig;
use crate::mapper::{MapperError, UidMapper, UID_MAPPER_FILE};
use crate::modules::ModuleKind;
use crate::store::StoreOptions;
use crate::transform::TransformChain;
use crate::validation::AsyncValidationPoller;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Attempts per API call for transient failures
pub const RETRY_ATTEMPTS_MAX: u32 = 3;

/// Branch-scoped dependencies of one module run
#[derive(Clone)]
pub struct MigrationContext {
    /// Client for this branch
    pub api: Arc<dyn ContentApi>,
    pub clock: Arc<dyn MigrationClock>,
    pub config: Arc<MigrationConfig>,
    pub branch: String,
    /// Root of this branch's content tree
    pub content_dir: PathBuf,
    pub transforms: TransformChain,
    pub cancel: CancellationToken,
}

impl MigrationContext {
    pub fn new(
        api: Arc<dyn ContentApi>,
        clock: Arc<dyn MigrationClock>,
        config: Arc<MigrationConfig>,
        branch: &str,
    ) -> Self {
        let content_dir = config.branch_dir(branch);
        MigrationContext {
            api,
            clock,
            config,
            branch: branch.to_string(),
            content_dir,
            transforms: TransformChain::standard(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_transforms(mut self, transforms: TransformChain) -> Self {
        self.transforms = transforms;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Batch driver configured for this run
    pub fn batch(&self) -> BatchOrchestrator {
        BatchOrchestrator::new(self.config.batch.clone(), self.clock.clone())
            .with_cancellation(self.cancel.clone())
    }

    /// Batch driver plus a token that stops only this batch run. Callbacks
    /// cancel it when a fatal local error makes further requests pointless.
    pub fn abortable_batch(&self) -> (BatchOrchestrator, CancellationToken) {
        let abort = self.cancel.child_token();
        let batch = BatchOrchestrator::new(self.config.batch.clone(), self.clock.clone())
            .with_cancellation(abort.clone());
        (batch, abort)
    }

    /// Validation poller configured for this run
    pub fn poller(&self) -> AsyncValidationPoller {
        AsyncValidationPoller::new(self.config.poller.clone(), self.clock.clone())
            .with_cancellation(self.cancel.clone())
    }

    /// `<content>/<module>`
    pub fn module_dir(&self, module: ModuleKind) -> PathBuf {
        self.content_dir.join(module.as_str())
    }

    /// `<content>/<mapper>/<module>`
    pub fn mapper_dir(&self, module: ModuleKind) -> PathBuf {
        self.content_dir
            .join(&self.config.mapper_dir)
            .join(module.as_str())
    }

    /// The module's primary uid map
    pub fn uid_mapper(&self, module: ModuleKind) -> Result<UidMapper, MapperError> {
        UidMapper::load(self.mapper_dir(module).join(UID_MAPPER_FILE))
    }

    /// A secondary map of the module (folders, urls, variants)
    pub fn named_mapper(&self, module: ModuleKind, file_name: &str) -> Result<UidMapper, MapperError> {
        UidMapper::load(self.mapper_dir(module).join(file_name))
    }

    /// Store options for a collection under `base_path`, using the
    /// configured chunk bound and format
    pub fn store_options(&self, base_path: &Path, module: ModuleKind) -> StoreOptions {
        StoreOptions::new(base_path, module.as_str())
            .with_chunk_byte_size(self.config.store.chunk_byte_size)
            .with_format(self.config.store.format)
    }

    pub fn master_locale(&self) -> &str {
        &self.config.master_locale
    }
}

/// Retry an API call on transient failures, immediately, up to
/// [`RETRY_ATTEMPTS_MAX`] attempts. Other errors return at once.
pub async fn retry_transient<T, F, Fut>(mut call: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Err(e) if e.is_transient() && attempt < RETRY_ATTEMPTS_MAX => {
                debug!("Retrying after transient failure (attempt {}): {}", attempt, e);
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InMemoryContentApi;
    use crate::clock::SimulatedClock;
    use std::cell::Cell;

    #[tokio::test]
    async fn test_retry_transient_then_success() {
        let calls = Cell::new(0);
        let result = retry_transient(|| {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 3 {
                    Err(ApiError::Transient("503".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn test_retry_gives_up_and_skips_permanent_errors() {
        let calls = Cell::new(0);
        let result: Result<(), ApiError> = retry_transient(|| {
            calls.set(calls.get() + 1);
            async { Err(ApiError::Transient("503".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), RETRY_ATTEMPTS_MAX);

        calls.set(0);
        let result: Result<(), ApiError> = retry_transient(|| {
            calls.set(calls.get() + 1);
            async { Err(ApiError::not_found("entries", "x")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_paths() {
        let config = Arc::new(MigrationConfig::test("/export"));
        let ctx = MigrationContext::new(
            Arc::new(InMemoryContentApi::new("dst")),
            Arc::new(SimulatedClock::new(0)),
            config,
            "main",
        );
        assert_eq!(ctx.module_dir(ModuleKind::Entries), PathBuf::from("/export/entries"));
        assert_eq!(
            ctx.mapper_dir(ModuleKind::Assets),
            PathBuf::from("/export/mapper/assets")
        );
    }
}
