//! Shared process-wide upstream I/O resources (spec §5 "Shared resources").
//!
//! All three remote clients (STT, LLM, TTS) and the warm-keeper borrow the
//! same [`reqwest::Client`] (keep-alive, pooled connections) and the same
//! concurrency [`Semaphore`], so the engine never opens a connection per
//! request and never lets one session's calls starve another's.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Shared upstream I/O handle, cloned cheaply into every client and the
/// warm-keeper.
#[derive(Clone)]
pub struct Upstream {
    /// Pooled HTTP client with keep-alive.
    pub http: reqwest::Client,
    /// Caps total in-flight upstream calls across all sessions.
    pub concurrency: Arc<Semaphore>,
}

impl Upstream {
    /// Build the shared client and limiter.
    ///
    /// # Panics
    ///
    /// Panics if the underlying TLS backend fails to initialize, which can
    /// only happen from a broken build environment.
    #[must_use]
    pub fn new(max_in_flight: usize) -> Self {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("building the shared HTTP client");

        Self {
            http,
            concurrency: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }
}
