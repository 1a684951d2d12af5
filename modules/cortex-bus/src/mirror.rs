//! External pub/sub mirror. Every in-process event is copied to a
//! Redis-style endpoint for horizontal fan-out to other processes.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{info, warn};

use cortex_common::{CortexError, CortexResult, RetryPolicy};

#[async_trait]
pub trait Mirror: Send + Sync {
    /// Push one serialized envelope to the external channel named by `topic`.
    async fn publish(&self, topic: &str, payload: &str) -> CortexResult<()>;

    fn name(&self) -> &str {
        "mirror"
    }
}

// ---------------------------------------------------------------------------
// Redis
// ---------------------------------------------------------------------------

pub struct RedisMirror {
    conn: ConnectionManager,
}

impl RedisMirror {
    /// Connect with bounded retries. Exhausting the budget means the mirror
    /// is permanently unreachable at startup — the launcher maps that to
    /// exit code 2.
    pub async fn connect(url: &str, policy: &RetryPolicy) -> CortexResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| CortexError::Config(format!("invalid redis url {url}: {e}")))?;

        let mut attempt = 0u32;
        loop {
            match client.get_connection_manager().await {
                Ok(conn) => {
                    info!(url, "Connected bus mirror");
                    return Ok(Self { conn });
                }
                Err(e) => {
                    attempt += 1;
                    if !policy.allows(attempt) {
                        return Err(CortexError::Transport(format!(
                            "mirror unreachable after {attempt} attempts: {e}"
                        )));
                    }
                    let delay = policy.delay(attempt);
                    warn!(
                        url,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Mirror connect failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl Mirror for RedisMirror {
    async fn publish(&self, topic: &str, payload: &str) -> CortexResult<()> {
        // ConnectionManager clones share the underlying multiplexed
        // connection and reconnect on their own.
        let mut conn = self.conn.clone();
        let _receivers: i64 = conn
            .publish(topic, payload)
            .await
            .map_err(|e| CortexError::Transport(format!("mirror publish: {e}")))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "redis"
    }
}

// ---------------------------------------------------------------------------
// Noop (mirror disabled / tests)
// ---------------------------------------------------------------------------

pub struct NoopMirror;

#[async_trait]
impl Mirror for NoopMirror {
    async fn publish(&self, _topic: &str, _payload: &str) -> CortexResult<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "noop"
    }
}
