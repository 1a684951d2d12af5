//! Optional LLM-assisted name matching. The client sits behind a trait so
//! tests run against canned responses; the production client is a thin
//! reqwest wrapper with a request deadline. A transient failure demotes the
//! resolver to rules-only until the background probe sees the service again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct MatchRequest {
    pub name: String,
    pub candidates: Vec<String>,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct MatchResponse {
    pub matched: bool,
    pub confidence: f64,
    #[serde(default)]
    pub suggested_canonical_name: Option<String>,
}

#[async_trait]
pub trait MatchClient: Send + Sync {
    async fn match_name(&self, request: &MatchRequest) -> anyhow::Result<MatchResponse>;

    /// Cheap liveness check used by the background probe.
    async fn health(&self) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

pub struct HttpMatchClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl HttpMatchClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl MatchClient for HttpMatchClient {
    async fn match_name(&self, request: &MatchRequest) -> anyhow::Result<MatchResponse> {
        let url = format!("{}/v1/match", self.base_url);
        debug!(name = request.name.as_str(), candidates = request.candidates.len(), "LLM match request");

        let response = self.http.post(&url).json(request).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("match service error ({status}): {body}");
        }
        Ok(response.json().await?)
    }

    async fn health(&self) -> anyhow::Result<()> {
        let url = format!("{}/healthz", self.base_url);
        self.http.get(&url).send().await?.error_for_status()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Matcher with health gating
// ---------------------------------------------------------------------------

pub struct LlmMatcher {
    client: Arc<dyn MatchClient>,
    model: String,
    healthy: AtomicBool,
}

impl LlmMatcher {
    pub fn new(client: Arc<dyn MatchClient>, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            healthy: AtomicBool::new(true),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn mark_unhealthy(&self) {
        if self.healthy.swap(false, Ordering::Relaxed) {
            warn!("LLM resolver marked unhealthy; demoting to rules-only");
        }
    }

    pub fn mark_healthy(&self) {
        if !self.healthy.swap(true, Ordering::Relaxed) {
            info!("LLM resolver recovered");
        }
    }

    /// One match attempt. Returns None when the service is unhealthy or the
    /// call fails; the caller falls through to the fuzzy tier either way.
    pub async fn try_match(&self, name: &str, candidates: Vec<String>) -> Option<MatchResponse> {
        if !self.is_healthy() || candidates.is_empty() {
            return None;
        }
        let request = MatchRequest {
            name: name.to_string(),
            candidates,
            model: self.model.clone(),
        };
        match self.client.match_name(&request).await {
            Ok(response) => Some(response),
            Err(e) => {
                warn!(error = %e, "LLM match failed; skipping assisted tier for this call");
                self.mark_unhealthy();
                None
            }
        }
    }

    /// Background probe: once unhealthy, poll the health endpoint until it
    /// answers, then re-enable the assisted tier.
    pub fn start_health_probe(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let matcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if matcher.is_healthy() {
                    continue;
                }
                match matcher.client.health().await {
                    Ok(()) => matcher.mark_healthy(),
                    Err(e) => debug!(error = %e, "LLM resolver still down"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct FlakyClient {
        calls: AtomicU64,
        healthy_after: u64,
    }

    #[async_trait]
    impl MatchClient for FlakyClient {
        async fn match_name(&self, _request: &MatchRequest) -> anyhow::Result<MatchResponse> {
            anyhow::bail!("connection reset")
        }

        async fn health(&self) -> anyhow::Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n >= self.healthy_after {
                Ok(())
            } else {
                anyhow::bail!("still down")
            }
        }
    }

    #[tokio::test]
    async fn transient_failure_demotes_to_rules_only() {
        let matcher = LlmMatcher::new(
            Arc::new(FlakyClient {
                calls: AtomicU64::new(0),
                healthy_after: 0,
            }),
            "match-small",
        );
        assert!(matcher.is_healthy());
        let result = matcher.try_match("Acme", vec!["Acme Inc".into()]).await;
        assert!(result.is_none());
        assert!(!matcher.is_healthy());
        // Unhealthy matcher skips silently without calling the client.
        assert!(matcher.try_match("Acme", vec!["Acme Inc".into()]).await.is_none());
    }

    #[tokio::test]
    async fn health_probe_recovers_the_matcher() {
        let matcher = Arc::new(LlmMatcher::new(
            Arc::new(FlakyClient {
                calls: AtomicU64::new(0),
                healthy_after: 1,
            }),
            "match-small",
        ));
        matcher.mark_unhealthy();

        let probe = matcher.start_health_probe(Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(2), async {
            while !matcher.is_healthy() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("matcher should recover");
        probe.abort();
    }

    #[tokio::test]
    async fn empty_candidate_list_skips_the_call() {
        let matcher = LlmMatcher::new(
            Arc::new(FlakyClient {
                calls: AtomicU64::new(0),
                healthy_after: 0,
            }),
            "match-small",
        );
        assert!(matcher.try_match("Acme", vec![]).await.is_none());
        // The failing client was never called, so health is untouched.
        assert!(matcher.is_healthy());
    }
}
