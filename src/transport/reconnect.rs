use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::channel::{ChannelEvent, TransportChannel};
use super::error::TransportError;
use super::wire::WireDialer;

/// Bounded fixed-delay retry policy.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Connection attempts before giving up
    pub max_attempts: u32,
    /// Delay before each attempt
    pub retry_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            retry_delay: Duration::from_millis(3000),
        }
    }
}

/// Drives reconnection after a spontaneous channel loss.
///
/// Each invocation of `reestablish` runs one bounded retry cycle with a
/// fresh attempt counter, so a connection that recovers and later drops
/// again gets the full budget back. The delay runs on the tokio clock,
/// which makes the policy testable under a paused runtime.
pub struct ReconnectSupervisor {
    dialer: Arc<dyn WireDialer>,
    endpoint: String,
    connect_timeout: Duration,
    policy: ReconnectPolicy,
}

impl ReconnectSupervisor {
    pub fn new(
        dialer: Arc<dyn WireDialer>,
        endpoint: String,
        connect_timeout: Duration,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            dialer,
            endpoint,
            connect_timeout,
            policy,
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Retry until the channel is reopened for `session_id` or the
    /// attempt budget runs out.
    pub async fn reestablish(
        &self,
        session_id: u64,
    ) -> Result<(TransportChannel, mpsc::Receiver<ChannelEvent>), TransportError> {
        for attempt in 1..=self.policy.max_attempts {
            info!(
                "Attempting to reconnect ({attempt}/{})...",
                self.policy.max_attempts
            );
            tokio::time::sleep(self.policy.retry_delay).await;

            match TransportChannel::open(
                self.dialer.as_ref(),
                &self.endpoint,
                Some(session_id),
                self.connect_timeout,
            )
            .await
            {
                Ok(reopened) => {
                    info!("Reconnected on attempt {attempt}");
                    return Ok(reopened);
                }
                Err(e) => {
                    warn!("Reconnection attempt {attempt} failed: {e}");
                }
            }
        }

        error!(
            "Max reconnection attempts reached ({})",
            self.policy.max_attempts
        );
        Err(TransportError::ReconnectExhausted {
            attempts: self.policy.max_attempts,
        })
    }
}
