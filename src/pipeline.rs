//! Shared fetch sequence used by the blocking and progressive paths

use std::sync::Arc;
use tracing::{debug, info};

use crate::aggregator::{AggregationObserver, LapAggregator};
use crate::cache::ResultPromiseCache;
use crate::provider::{ResultsApi, SessionProvider};
use crate::resolver::resolve_race_index;
use crate::transform::Transformer;
use crate::types::{LapDataByParticipant, RaceResult, RawResult, RawSession};
use crate::{Result, ResultsError};

/// Upstream document fetched and checked for a race block.
pub(crate) struct LoadedResult {
    pub client: Arc<dyn ResultsApi>,
    pub raw: RawResult,
    race_index: usize,
}

impl LoadedResult {
    pub fn race(&self) -> &RawSession {
        &self.raw.session_results[self.race_index]
    }
}

/// Collaborators every fetch needs, wired once per service.
pub(crate) struct Pipeline {
    pub session: Arc<dyn SessionProvider>,
    pub transformer: Arc<dyn Transformer>,
    pub aggregator: LapAggregator,
    pub results: Arc<ResultPromiseCache>,
}

impl Pipeline {
    /// Authenticate, fetch the result document and resolve its race block.
    pub async fn load(&self, result_id: u64) -> Result<LoadedResult> {
        let client = self.session.ensure_session().await?;
        let raw = client.get_result(result_id).await?;

        let (race_index, _) = resolve_race_index(&raw)
            .map_err(|e| ResultsError::invalid_shape(result_id, e.to_string()))?;

        Ok(LoadedResult { client, raw, race_index })
    }

    /// Map a loaded document and lap data to the domain model.
    pub fn build(&self, result_id: u64, loaded: &LoadedResult, laps: &LapDataByParticipant) -> Result<RaceResult> {
        self.transformer
            .transform(&loaded.raw, loaded.race(), laps)
            .ok_or_else(|| ResultsError::invalid_shape(result_id, "no result could be built from the race block"))
    }

    /// Collect lap data for the loaded race block.
    pub async fn aggregate<O>(&self, result_id: u64, loaded: &LoadedResult, observer: &mut O) -> Result<LapDataByParticipant>
    where
        O: AggregationObserver + ?Sized,
    {
        let report = self.aggregator.aggregate(loaded.client.as_ref(), result_id, loaded.race(), observer).await?;
        Ok(report.laps)
    }

    /// Fetch everything, then build the result.
    pub async fn load_complete(&self, result_id: u64) -> Result<Arc<RaceResult>> {
        debug!(result_id, "Loading result");
        let loaded = self.load(result_id).await?;
        let laps = self.aggregate(result_id, &loaded, &mut ()).await?;
        let result = self.build(result_id, &loaded, &laps)?;

        info!(
            result_id,
            participants = result.participants.len(),
            with_laps = laps.len(),
            "Result loaded"
        );
        Ok(Arc::new(result))
    }
}
