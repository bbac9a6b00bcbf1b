//! Probe orchestration.
//!
//! A probe resolves the target, obtains a session token, fetches every
//! enabled category concurrently and turns whatever came back before the
//! deadline into a fresh [`ProbeRegistry`]. Only an unknown target is
//! reported as an error; every other failure shows up as
//! `commvault_scrape_success 0` and a per-category success gauge.

use crate::client::{ClientStatus, CommvaultClient, JobRecord, SystemInfo};
use crate::config::{Category, ProbeConfig};
use crate::error::{CommvaultError, Result};
use crate::mapper;
use crate::metrics::{MetricSample, ProbeRegistry};
use crate::session::SessionManager;
use crate::targets::TargetRegistry;
use futures_util::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Successful payload of one category fetch.
#[derive(Debug, Clone)]
pub enum CategoryPayload {
    Jobs(Vec<JobRecord>),
    Clients(Vec<ClientStatus>),
    SystemInfo(SystemInfo),
}

impl CategoryPayload {
    fn into_samples(self) -> Vec<MetricSample> {
        match self {
            Self::Jobs(jobs) => mapper::map_jobs(&jobs),
            Self::Clients(clients) => mapper::map_clients(&clients),
            Self::SystemInfo(info) => mapper::map_system_info(&info),
        }
    }
}

/// Outcome of one category fetch within a probe.
pub type CategoryResult = (Category, Result<CategoryPayload>);

/// Runs probes against configured targets.
pub struct Prober {
    targets: TargetRegistry,
    clients: HashMap<String, CommvaultClient>,
    sessions: SessionManager,
    config: ProbeConfig,
}

impl Prober {
    /// Build API clients for every target.
    pub fn new(targets: TargetRegistry, config: ProbeConfig) -> Result<Self> {
        let clients = targets
            .iter()
            .map(|target| Ok((target.name.clone(), CommvaultClient::new(target.clone())?)))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self {
            targets,
            clients,
            sessions: SessionManager::new(config.session_ttl()),
            config,
        })
    }

    pub fn targets(&self) -> &TargetRegistry {
        &self.targets
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Probe `name` with the configured deadline.
    pub async fn probe(&self, name: &str) -> Result<ProbeRegistry> {
        self.probe_with_deadline(name, self.config.timeout()).await
    }

    /// Probe `name`, giving up on anything still running after `deadline`.
    pub async fn probe_with_deadline(
        &self,
        name: &str,
        deadline: Duration,
    ) -> Result<ProbeRegistry> {
        let client = self
            .targets
            .get(name)
            .and_then(|target| self.clients.get(&target.name))
            .ok_or_else(|| CommvaultError::TargetNotFound(name.to_string()))?;

        let categories: Vec<Category> = Category::ALL
            .into_iter()
            .filter(|category| client.target().is_enabled(*category))
            .collect();

        info!(target_name = %name, "Starting probe");
        let deadline_at = tokio::time::Instant::now() + deadline;

        // Scrape duration covers collection only; a failed login reports zero.
        let (results, duration) =
            match tokio::time::timeout_at(deadline_at, self.sessions.token(client)).await {
                Ok(Ok(token)) => {
                    let started = Instant::now();
                    let results = self.collect(client, &token, &categories, deadline_at).await;
                    (results, started.elapsed())
                }
                Ok(Err(e)) => {
                    warn!(target_name = %name, error_kind = e.kind(), "Probe authentication failed: {}", e);
                    (Vec::new(), Duration::ZERO)
                }
                Err(_) => {
                    warn!(target_name = %name, "Probe deadline reached while authenticating");
                    (Vec::new(), Duration::ZERO)
                }
            };

        let registry = aggregate(name, &categories, results, duration);
        info!(
            target_name = %name,
            "Probe collected in {:.2} seconds",
            duration.as_secs_f64()
        );
        Ok(registry)
    }

    /// Fetch all categories concurrently until they finish or the deadline passes.
    ///
    /// Fetches still running at the deadline are dropped, which cancels them.
    async fn collect(
        &self,
        client: &CommvaultClient,
        token: &str,
        categories: &[Category],
        deadline: tokio::time::Instant,
    ) -> Vec<CategoryResult> {
        let mut pending: FuturesUnordered<_> = categories
            .iter()
            .map(|&category| async move { (category, fetch_category(client, token, category).await) })
            .collect();

        let mut results = Vec::with_capacity(categories.len());
        let expired = tokio::time::sleep_until(deadline);
        tokio::pin!(expired);

        loop {
            tokio::select! {
                next = pending.next() => match next {
                    Some((category, result)) => {
                        if matches!(result, Err(CommvaultError::Auth(_))) {
                            self.sessions.invalidate(&client.target().name, token).await;
                        }
                        debug!(target_name = %client.target().name, %category, "Category finished");
                        results.push((category, result));
                    }
                    None => break,
                },
                _ = &mut expired => {
                    warn!(
                        target_name = %client.target().name,
                        "Probe deadline reached with {} categories in flight",
                        pending.len()
                    );
                    break;
                }
            }
        }

        results
    }
}

async fn fetch_category(
    client: &CommvaultClient,
    token: &str,
    category: Category,
) -> Result<CategoryPayload> {
    match category {
        Category::Jobs => client.fetch_jobs(token).await.map(CategoryPayload::Jobs),
        Category::Clients => client.fetch_clients(token).await.map(CategoryPayload::Clients),
        Category::SystemInfo => client
            .fetch_system_info(token)
            .await
            .map(CategoryPayload::SystemInfo),
    }
}

/// Build the probe registry. Categories without a result count as failed.
fn aggregate(
    target: &str,
    categories: &[Category],
    mut results: Vec<CategoryResult>,
    duration: Duration,
) -> ProbeRegistry {
    let mut samples = Vec::new();
    let mut outcomes = Vec::with_capacity(categories.len());

    for &category in categories {
        let result = results
            .iter()
            .position(|(c, _)| *c == category)
            .map(|index| results.swap_remove(index).1);

        let ok = match result {
            Some(Ok(payload)) => {
                samples.extend(payload.into_samples());
                true
            }
            Some(Err(e)) => {
                warn!(
                    target_name = %target,
                    %category,
                    error_kind = e.kind(),
                    "Category collection failed: {}",
                    e
                );
                false
            }
            None => {
                warn!(target_name = %target, %category, "Category not collected");
                false
            }
        };
        outcomes.push((category, ok));
    }

    samples.extend(mapper::map_scrape(&outcomes, duration));
    ProbeRegistry::from_samples(samples)
}
