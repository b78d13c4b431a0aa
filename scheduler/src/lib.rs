//! Cron synchronizing the members of groups having a remote query.

use chrono::{DateTime, Local, Utc};
use propagation::Engine;
use sgroups::{Config, Mright, Periodicity, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use sync_cache::SyncCache;
use tracing::{debug, error, info};

/// Sleep when there is no synchronized group yet
const IDLE_SLEEP: Duration = Duration::from_secs(60);

/// Sleep after a failed cycle, before retrying
const ERROR_BACKOFF: Duration = Duration::from_secs(30);

/// Current time, replaced in tests
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct Scheduler {
    config: Arc<Config>,
    cache: SyncCache,
    engine: Arc<Engine>,
    clock: Clock,
    next_due: BTreeMap<Periodicity, DateTime<Utc>>,
}

impl Scheduler {
    pub fn new(config: Arc<Config>, cache: SyncCache, engine: Arc<Engine>) -> Self {
        Self {
            config,
            cache,
            engine,
            clock: Arc::new(Utc::now),
            next_due: BTreeMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn next_elapse(&self, periodicity: Periodicity, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.config.timezone() {
            Some(tz) => periodicity.next_elapse(&now.with_timezone(&tz)),
            None => periodicity.next_elapse(&now.with_timezone(&Local)),
        }
    }

    /// Synchronize the due groups. Returns how long to sleep, `None` when a periodicity became
    /// due again while synchronizing.
    pub async fn tick(&mut self) -> Result<Option<Duration>> {
        let now = (self.clock)();
        let periodicity_to_groups = self.cache.get().await?;
        self.next_due
            .retain(|periodicity, _| periodicity_to_groups.contains_key(periodicity));

        for (periodicity, ids) in periodicity_to_groups.iter() {
            let due = self.next_due.get(periodicity).copied().unwrap_or(now);
            if due > now {
                continue;
            }
            info!("synchronizing {} groups ({})", ids.len(), periodicity);
            for id in ids {
                if let Err(e) = self.engine.propagate(vec![(id.clone(), Mright::Member)]).await {
                    error!("synchronizing {:?} failed: {}", id.as_str(), e);
                }
            }
            let next = self.next_elapse(*periodicity, now);
            debug!("next synchronization for {}: {}", periodicity, next);
            self.next_due.insert(*periodicity, next);
        }

        let Some(earliest) = self.next_due.values().min() else {
            return Ok(Some(IDLE_SLEEP));
        };
        let after = (self.clock)();
        Ok((*earliest - after).to_std().ok().filter(|d| !d.is_zero()))
    }

    /// One iteration of the cron: how long to sleep before the next one
    pub async fn cycle(&mut self) -> Duration {
        match self.tick().await {
            Ok(Some(sleep)) => sleep,
            Ok(None) => {
                info!("next periodicity became due during synchronization");
                Duration::ZERO
            }
            Err(e) => {
                error!("synchronization cycle failed, retrying in {:?}: {}", ERROR_BACKOFF, e);
                ERROR_BACKOFF
            }
        }
    }

    /// Loop forever, unless no remote is configured
    pub async fn run(mut self) -> Result<()> {
        if self.config.remotes.is_empty() {
            info!("nothing to synchronize (no remotes), exiting cron");
            return Ok(());
        }
        info!("starting synchronize cron");
        loop {
            let sleep = self.cycle().await;
            if !sleep.is_zero() {
                debug!("sleeping {:?}", sleep);
                tokio::time::sleep(sleep).await;
            }
        }
    }
}
