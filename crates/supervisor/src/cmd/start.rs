use anyhow::Result;
use tracing::info;

use super::into_anyhow;
use super::provider_client;
use crate::config::ProvisionConfig;
use crate::config::StartArgs;
use crate::domain::lifecycle::PodLifecycleManager;
use crate::domain::readiness::ReadinessWaiter;
use crate::domain::session::Session;
use crate::domain::session::DESKTOP_PORT;
use crate::domain::traits::PodProvider;
use crate::domain::traits::SystemClock;
use crate::infrastructure::http::BasicAuthProbe;
use crate::infrastructure::http::BASIC_AUTH_USER;
use crate::infrastructure::http::DEFAULT_REQUEST_TIMEOUT;

/// Gets or creates the pod and blocks until it is reachable.
pub(crate) fn provision(provider: &dyn PodProvider, config: &ProvisionConfig) -> Result<Session> {
    let lifecycle = PodLifecycleManager::new(provider);
    let pod = lifecycle
        .get_or_create(&config.spec, config.existing)
        .map_err(into_anyhow)?;

    let probe = BasicAuthProbe::new(&config.spec.password, DEFAULT_REQUEST_TIMEOUT)?;
    ReadinessWaiter::new(provider, &probe, &SystemClock, config.readiness)
        .wait(&pod)
        .map_err(into_anyhow)
}

/// Desktop URL with credentials embedded
pub(crate) fn desktop_url(session: &Session, password: &str) -> String {
    let proxy = session.proxy_url(DESKTOP_PORT);
    let host = proxy.trim_start_matches("https://");
    format!("https://{BASIC_AUTH_USER}:{password}@{host}/")
}

pub fn run_start(args: StartArgs) -> Result<()> {
    let config = ProvisionConfig::new(&args.session, &args.provision);
    let provider = provider_client(&args.provider)?;

    let pod = provision(&provider, &config)?;
    info!("Pod {} is up", pod.id);

    println!("Pod id: {}", pod.id);
    println!("Desktop: {}", desktop_url(&pod, &config.spec.password));
    Ok(())
}
