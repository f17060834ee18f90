use error_stack::Report;
use tracing::info;
use tracing::warn;

use super::session::Session;
use super::session::DESKTOP_PORT;
use super::traits::Clock;
use super::traits::HttpProbe;
use super::traits::PodProvider;
use crate::config::ReadinessConfig;
use crate::error::ReadinessError;

/// Waits until the pod's management endpoint answers and ssh is exposed.
pub struct ReadinessWaiter<'a> {
    provider: &'a dyn PodProvider,
    probe: &'a dyn HttpProbe,
    clock: &'a dyn Clock,
    config: ReadinessConfig,
}

impl<'a> ReadinessWaiter<'a> {
    pub fn new(
        provider: &'a dyn PodProvider,
        probe: &'a dyn HttpProbe,
        clock: &'a dyn Clock,
        config: ReadinessConfig,
    ) -> Self {
        Self {
            provider,
            probe,
            clock,
            config,
        }
    }

    /// Returns the refreshed session once ready, or `Timeout`.
    pub fn wait(&self, session: &Session) -> Result<Session, Report<ReadinessError>> {
        let started = self.clock.now();
        let management_url = format!("{}/", session.proxy_url(DESKTOP_PORT));
        info!("Waiting for pod {} to become ready", session.id);

        loop {
            let refreshed = match self.provider.get_pod(&session.id) {
                Ok(pod) => Some(pod),
                Err(e) => {
                    warn!("Failed to refresh pod {}: {e:?}", session.id);
                    None
                }
            };

            let management_up = self.probe.is_reachable(&management_url);
            let ssh_open = refreshed
                .as_ref()
                .is_some_and(|pod| pod.ssh_endpoint().is_some());

            if let Some(pod) = refreshed.filter(|_| management_up && ssh_open) {
                info!("Pod {} is ready", pod.id);
                return Ok(pod);
            }

            let waited = self.clock.now().duration_since(started);
            if waited >= self.config.timeout {
                return Err(Report::new(ReadinessError::Timeout {
                    pod_id: session.id.clone(),
                    waited_secs: waited.as_secs(),
                })
                .attach_printable(format!(
                    "management endpoint up: {management_up}, ssh port open: {ssh_open}"
                )));
            }

            info!(
                management_up,
                ssh_open, "Pod {} not ready yet, waited {}s", session.id, waited.as_secs()
            );
            self.clock.sleep(self.config.poll_interval);
        }
    }
}
