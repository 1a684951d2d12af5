//! The polling source contract and the HTTP feed seam adapters share.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use cortex_common::Signal;

/// A polymorphic polling source. Adapters are stateless across polls: resume
/// state, if any, lives upstream. A missing or unhealthy upstream yields an
/// empty batch and records the failure; built-in adapters never error.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &str;

    /// Industry tag the ingestor groups this adapter under.
    fn industry(&self) -> &str;

    /// Minimum interval between polls. The ingestor enforces a poll deadline
    /// of cadence×2.
    fn cadence(&self) -> Duration;

    async fn poll(&self) -> anyhow::Result<Vec<Signal>>;

    /// Upstream failures observed by this adapter since startup.
    fn upstream_failures(&self) -> u64 {
        0
    }
}

/// Typed record fetch from one upstream endpoint. Adapters consume feeds so
/// tests can substitute fixtures for the network.
#[async_trait]
pub trait SignalFeed<T>: Send + Sync
where
    T: DeserializeOwned + Send + 'static,
{
    async fn fetch(&self) -> anyhow::Result<Vec<T>>;
}

/// GET a JSON array of records from a single URL, with a request deadline.
pub struct HttpFeed<T> {
    url: String,
    client: reqwest::Client,
    _record: PhantomData<fn() -> T>,
}

impl<T> HttpFeed<T> {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
            _record: PhantomData,
        })
    }
}

#[async_trait]
impl<T> SignalFeed<T> for HttpFeed<T>
where
    T: DeserializeOwned + Send + 'static,
{
    async fn fetch(&self) -> anyhow::Result<Vec<T>> {
        let response = self.client.get(&self.url).send().await?;
        let response = response.error_for_status()?;
        Ok(response.json().await?)
    }
}

/// Shared failure counter for the built-in adapters.
#[derive(Default)]
pub(crate) struct FailureCounter(AtomicU64);

impl FailureCounter {
    pub fn record(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
