//! Upstream collaborator traits

use std::sync::Arc;

use crate::Result;
use crate::types::{LapDataOptions, RawLapChunk, RawResult};

/// Authenticated client for the statistics service.
///
/// Implementations own transport and wire format. Errors should use the
/// [`ResultsError`](crate::ResultsError) kinds: throttling responses as
/// `Network` with status 429, everything else transport-related as `Network`.
#[async_trait::async_trait]
pub trait ResultsApi: Send + Sync + 'static {
    /// Fetch the full result document for a sub-session.
    async fn get_result(&self, result_id: u64) -> Result<RawResult>;

    /// Fetch one participant's lap rows for a session block.
    ///
    /// With `options.all_chunks` set, implementations must follow pagination
    /// and return every chunk before resolving.
    async fn get_lap_data(
        &self,
        cust_id: i64,
        result_id: u64,
        simsession_number: i32,
        options: LapDataOptions,
    ) -> Result<Vec<RawLapChunk>>;
}

/// Session and credential collaborator.
///
/// The pipeline calls [`ensure_session`](SessionProvider::ensure_session)
/// once per upstream fetch sequence and never tries to recover its
/// authentication-class failures.
#[async_trait::async_trait]
pub trait SessionProvider: Send + Sync + 'static {
    /// Return a ready client, logging in first if required.
    ///
    /// Returns:
    /// - `Ok(client)` - Authenticated client
    /// - `Err(NotConfigured | LoginFailed | InvalidCredentials | CaptchaRequired)`
    /// - `Err(Network)` - Transport failure while logging in
    async fn ensure_session(&self) -> Result<Arc<dyn ResultsApi>>;
}

/// Session provider wrapping an already-authenticated client.
pub struct StaticSession {
    client: Arc<dyn ResultsApi>,
}

impl StaticSession {
    pub fn new(client: Arc<dyn ResultsApi>) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl SessionProvider for StaticSession {
    async fn ensure_session(&self) -> Result<Arc<dyn ResultsApi>> {
        Ok(Arc::clone(&self.client))
    }
}
