//! Result service facade

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::aggregator::LapAggregator;
use crate::cache::{CacheStats, LapCache, ResultPromiseCache};
use crate::config::PipelineConfig;
use crate::limiter::RateLimiter;
use crate::pipeline::Pipeline;
use crate::progressive::{ProgressiveLoader, ProgressiveStream};
use crate::provider::SessionProvider;
use crate::transform::{DefaultTransformer, Transformer};
use crate::types::RaceResult;
use crate::{ErrorKind, Result};

/// Per-call options for [`ResultService::fetch_result_with`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Drop any cached or in-flight fetch and start a new one
    pub force_refresh: bool,
}

/// Entry point for UI and reporting layers.
///
/// Cloning is cheap; clones share caches, the rate limiter, and running
/// progressive loads.
#[derive(Clone)]
pub struct ResultService {
    pipeline: Arc<Pipeline>,
    progressive: Arc<ProgressiveLoader>,
    config: Arc<PipelineConfig>,
}

impl ResultService {
    /// Service with default caches, limiter and transformer built from `config`.
    pub fn new(session: Arc<dyn SessionProvider>, config: PipelineConfig) -> Result<Self> {
        Self::builder(session).config(config).build()
    }

    pub fn builder(session: Arc<dyn SessionProvider>) -> ResultServiceBuilder {
        ResultServiceBuilder {
            session,
            config: PipelineConfig::default(),
            transformer: None,
            lap_cache: None,
            results: None,
            limiter: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Fetch a result, waiting for all lap data.
    ///
    /// Concurrent calls for the same result share one upstream sequence.
    /// Returns `Ok(None)` when the upstream payload holds no usable race
    /// session. While a progressive load for the result is running, this
    /// returns its coarse value; if that load is cancelled first, the fetch
    /// starts over on its own.
    pub async fn fetch_result(&self, result_id: u64) -> Result<Option<Arc<RaceResult>>> {
        self.fetch_result_with(result_id, FetchOptions::default()).await
    }

    pub async fn fetch_result_with(
        &self,
        result_id: u64,
        options: FetchOptions,
    ) -> Result<Option<Arc<RaceResult>>> {
        if options.force_refresh && self.pipeline.results.evict(result_id) {
            debug!(result_id, "Forced refresh evicted cached result");
        }

        loop {
            let pipeline = Arc::clone(&self.pipeline);
            let fetch = self
                .pipeline
                .results
                .get_or_create(result_id, move || async move { pipeline.load_complete(result_id).await });

            return match fetch.await {
                Ok(result) => Ok(Some(result)),
                Err(error) if error.kind() == ErrorKind::InvalidResultShape => {
                    info!(result_id, error = %error, "No race result available");
                    Ok(None)
                }
                // A progressive load this call joined was cancelled; its slot is already gone
                Err(error) if error.kind() == ErrorKind::Cancelled => {
                    debug!(result_id, "Joined load was cancelled, fetching again");
                    continue;
                }
                Err(error) => Err(error),
            };
        }
    }

    /// Fetch a result as a stream of [`LoadEvent`](crate::LoadEvent)s.
    ///
    /// Must be called within a tokio runtime. Dropping the stream cancels
    /// the load.
    pub fn fetch_result_progressive(&self, result_id: u64) -> ProgressiveStream {
        self.progressive.start(result_id)
    }

    /// Forget the cached result and its lap data so the next request refetches.
    pub fn invalidate(&self, result_id: u64) -> bool {
        let evicted = self.pipeline.results.evict(result_id);
        let laps = self.pipeline.aggregator.cache().invalidate_result(result_id);
        info!(result_id, evicted, laps, "Invalidated result");
        evicted || laps > 0
    }

    pub fn cache_stats(&self) -> CacheStats {
        let results = &self.pipeline.results;
        let laps = self.pipeline.aggregator.cache();
        CacheStats {
            entries: results.len(),
            hit_rate: results.hit_rate(),
            in_flight: results.in_flight(),
            lap_entries: laps.len(),
            lap_hit_rate: laps.hit_rate(),
        }
    }

    /// Progressive loads currently running.
    pub fn active_streams(&self) -> usize {
        self.progressive.active_streams()
    }

    /// Start the periodic lap cache sweep until `cancel` fires.
    pub fn spawn_maintenance(&self, cancel: CancellationToken) -> JoinHandle<()> {
        self.pipeline.aggregator.cache().spawn_sweeper(self.config.cache.sweep_interval(), cancel)
    }
}

/// Wires a [`ResultService`] with optional injected collaborators.
pub struct ResultServiceBuilder {
    session: Arc<dyn SessionProvider>,
    config: PipelineConfig,
    transformer: Option<Arc<dyn Transformer>>,
    lap_cache: Option<Arc<LapCache>>,
    results: Option<Arc<ResultPromiseCache>>,
    limiter: Option<Arc<RateLimiter>>,
}

impl ResultServiceBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformer = Some(transformer);
        self
    }

    /// Share a lap cache between services.
    pub fn lap_cache(mut self, cache: Arc<LapCache>) -> Self {
        self.lap_cache = Some(cache);
        self
    }

    pub fn result_cache(mut self, cache: Arc<ResultPromiseCache>) -> Self {
        self.results = Some(cache);
        self
    }

    /// Share one limiter so several services pace the same upstream account.
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn build(self) -> Result<ResultService> {
        self.config.validate()?;

        let limiter = self.limiter.unwrap_or_else(|| Arc::new(RateLimiter::new(self.config.rate_limit.clone())));
        let lap_cache = self.lap_cache.unwrap_or_else(|| Arc::new(LapCache::new(self.config.cache.lap_ttl())));
        let pipeline = Arc::new(Pipeline {
            session: self.session,
            transformer: self.transformer.unwrap_or_else(|| Arc::new(DefaultTransformer::new()) as Arc<dyn Transformer>),
            aggregator: LapAggregator::new(limiter, lap_cache),
            results: self.results.unwrap_or_else(ResultPromiseCache::new),
        });

        Ok(ResultService {
            progressive: Arc::new(ProgressiveLoader::new(Arc::clone(&pipeline))),
            pipeline,
            config: Arc::new(self.config),
        })
    }
}
