//! Registry cleaner.
//!
//! Tickets are purged lazily when a read notices they expired, but sessions
//! nobody touches again would stay in the store forever and their services
//! would never hear about the logout. The cleaner sweeps them periodically:
//! expired ticket-granting tickets go through single logout, everything
//! else expired is deleted.
//!
//! Only one node sweeps at a time: the sweep runs under
//! [`CLEANER_LOCK_KEY`] in a lock repository of its own, so a long sweep
//! never holds a lock slot that ticket ids hash into.

use crate::config::CleanerConfig;
use crate::constants::CLEANER_LOCK_KEY;
use crate::error::Result;
use crate::lock::LockRepository;
use crate::logout::LogoutManager;
use crate::metrics as names;
use crate::providers::{HttpClient, ServiceRegistry, TicketStore};
use crate::registry::TicketRegistry;
use crate::ticket::TicketKind;
use metrics::counter;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Expired sessions that went through single logout.
    pub sessions_logged_out: usize,

    /// Tickets removed, descendants included.
    pub removed: usize,
}

/// Periodic expired-ticket reaper.
///
/// `C` guards the sweep itself; it must not be the registry's own lock
/// repository instance.
pub struct RegistryCleaner<S, L, H, R, C> {
    registry: Arc<TicketRegistry<S, L>>,
    logout: Arc<LogoutManager<H, R>>,
    locks: C,
    config: CleanerConfig,
}

impl<S, L, H, R, C> std::fmt::Debug for RegistryCleaner<S, L, H, R, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCleaner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S, L, H, R, C> RegistryCleaner<S, L, H, R, C>
where
    S: TicketStore + 'static,
    L: LockRepository + 'static,
    H: HttpClient,
    R: ServiceRegistry + 'static,
    C: LockRepository + 'static,
{
    /// Create a cleaner for `registry`, coordinating runs through `locks`.
    #[must_use]
    pub const fn new(
        registry: Arc<TicketRegistry<S, L>>,
        logout: Arc<LogoutManager<H, R>>,
        locks: C,
        config: CleanerConfig,
    ) -> Self {
        Self {
            registry,
            logout,
            locks,
            config,
        }
    }

    /// Run one sweep now.
    ///
    /// If another node holds the cleaner lock, nothing is done and an empty
    /// report is returned.
    ///
    /// # Errors
    ///
    /// Returns error if the registry scan fails. Failures on individual
    /// sessions are logged and skipped.
    pub async fn clean(&self) -> Result<CleanupReport> {
        let swept = self.locks.execute(CLEANER_LOCK_KEY, || self.sweep()).await;

        swept.unwrap_or_else(|| {
            tracing::debug!("Registry cleaner lock busy; skipping run");
            Ok(CleanupReport::default())
        })
    }

    async fn sweep(&self) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();

        let expired = self.registry.expired_tickets().await?;
        let sessions = expired
            .iter()
            .filter(|ticket| ticket.kind() == TicketKind::TicketGranting);
        for session in sessions {
            match self.logout.perform_logout(&self.registry, session.id()).await {
                Ok(outcome) => {
                    report.sessions_logged_out += 1;
                    report.removed += outcome.deletion.deleted;
                }
                Err(error) => {
                    tracing::warn!(ticket_id = %session.id(), error = %error, "Failed to log out expired session");
                }
            }
        }

        report.removed += self.registry.clean_expired().await?;

        counter!(names::CLEANER_RUNS_TOTAL).increment(1);
        counter!(names::CLEANER_REMOVED_TOTAL).increment(report.removed as u64);
        tracing::info!(
            sessions = report.sessions_logged_out,
            removed = report.removed,
            "Registry cleaner run finished"
        );
        Ok(report)
    }

    /// Run the cleaner in the background until `shutdown` fires (or its
    /// sender is dropped).
    ///
    /// # Returns
    ///
    /// `None` if the cleaner is disabled in configuration.
    pub fn spawn(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> Option<JoinHandle<()>> {
        if !self.config.enabled {
            tracing::info!("Registry cleaner disabled");
            return None;
        }

        let period = self.config.repeat_interval.max(Duration::from_millis(1));
        let start = Instant::now() + self.config.start_delay;

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                start_delay_ms = self.config.start_delay.as_millis(),
                repeat_interval_ms = period.as_millis(),
                "Registry cleaner started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        tracing::info!("Registry cleaner stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(error) = self.clean().await {
                            tracing::warn!(error = %error, "Registry cleaner run failed");
                        }
                    }
                }
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authentication::{Authentication, Principal};
    use crate::config::{RegistryConfig, SingleLogoutConfig};
    use crate::expiration::ExpirationPolicy;
    use crate::lock::MaskedHashLockRepository;
    use crate::mocks::{MockHttpClient, MockServiceRegistry, SequentialTicketIdGenerator};
    use crate::service::{RegisteredService, Service};
    use crate::stores::InMemoryTicketStore;
    use crate::ticket::{ChildTicketSpec, Ticket};
    use sso_testing::{ManualClock, manual_test_clock, test_epoch};

    type Cleaner = RegistryCleaner<
        InMemoryTicketStore,
        MaskedHashLockRepository,
        MockHttpClient,
        MockServiceRegistry,
        MaskedHashLockRepository,
    >;

    fn setup(config: CleanerConfig) -> (Arc<Cleaner>, MockHttpClient, ManualClock) {
        setup_with_locks(
            MaskedHashLockRepository::default(),
            MaskedHashLockRepository::default(),
            config,
        )
    }

    fn setup_with_locks(
        ticket_locks: MaskedHashLockRepository,
        cleaner_locks: MaskedHashLockRepository,
        config: CleanerConfig,
    ) -> (Arc<Cleaner>, MockHttpClient, ManualClock) {
        let clock = manual_test_clock();
        let http = Arc::new(MockHttpClient::new());
        let services = Arc::new(
            MockServiceRegistry::new()
                .with_service(RegisteredService::new(1, "app", "https://app.example")),
        );
        let registry = Arc::new(TicketRegistry::new(
            InMemoryTicketStore::new(),
            ticket_locks,
            Arc::new(clock.clone()),
            RegistryConfig::default(),
        ));
        let logout = Arc::new(LogoutManager::new(
            Arc::clone(&http),
            services,
            Arc::new(SequentialTicketIdGenerator::new()),
            SingleLogoutConfig::default(),
        ));
        let cleaner = Arc::new(RegistryCleaner::new(registry, logout, cleaner_locks, config));
        (cleaner, (*http).clone(), clock)
    }

    async fn seed_session(cleaner: &Cleaner, tgt_id: &str, st_id: &str, ttl_secs: u64) {
        let mut tgt = Ticket::ticket_granting(
            tgt_id.into(),
            Authentication::new(Principal::new("casuser"), test_epoch()),
            ExpirationPolicy::hard_timeout(Duration::from_secs(ttl_secs)),
            test_epoch(),
        );
        let st = tgt
            .grant_service_ticket(
                st_id.into(),
                Service::new("https://app.example"),
                ChildTicketSpec {
                    policy: ExpirationPolicy::NeverExpires,
                    reusable: false,
                    only_track_most_recent_session: true,
                },
                true,
                test_epoch(),
            )
            .unwrap();
        cleaner.registry.add_ticket(&tgt).await.unwrap();
        cleaner.registry.add_ticket(&st).await.unwrap();
    }

    #[tokio::test]
    async fn test_clean_logs_out_expired_sessions_only() {
        let (cleaner, http, clock) = setup(CleanerConfig::default());
        seed_session(&cleaner, "TGT-1", "ST-1", 60).await;
        seed_session(&cleaner, "TGT-2", "ST-2", 3600).await;

        clock.advance(chrono::Duration::seconds(120));
        let report = cleaner.clean().await.unwrap();

        assert_eq!(report.sessions_logged_out, 1);
        assert_eq!(report.removed, 2);
        assert_eq!(cleaner.registry.store().len(), 2);
        assert!(cleaner.registry.store().contains(&"TGT-2".into()));

        let posts = http.posts();
        assert_eq!(posts.len(), 1);
        assert!(posts[0].fields[0].1.contains("ST-1"));
    }

    #[tokio::test]
    async fn test_clean_with_nothing_expired_is_a_no_op() {
        let (cleaner, http, _) = setup(CleanerConfig::default());
        seed_session(&cleaner, "TGT-1", "ST-1", 3600).await;

        assert_eq!(cleaner.clean().await.unwrap(), CleanupReport::default());
        assert!(http.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_sweep_does_not_block_ticket_locks() {
        // One slot each: every ticket id shares the same mutex.
        let (cleaner, _, clock) = setup_with_locks(
            MaskedHashLockRepository::new(0, Duration::from_secs(3)),
            MaskedHashLockRepository::new(0, Duration::from_secs(3)),
            CleanerConfig::default(),
        );
        seed_session(&cleaner, "TGT-1", "ST-1", 60).await;
        seed_session(&cleaner, "TGT-2", "ST-2", 3600).await;
        clock.advance(chrono::Duration::seconds(120));

        let running = &cleaner;
        let (touched, concurrent) = cleaner
            .locks
            .execute(CLEANER_LOCK_KEY, || async move {
                let touched = running
                    .registry
                    .mutate_ticket(&"TGT-2".into(), TicketKind::TicketGranting, |ticket, now| {
                        ticket.update_state(now);
                        Ok(ticket.count_of_uses())
                    })
                    .await;
                (touched, running.clean().await)
            })
            .await
            .unwrap();

        assert_eq!(touched.unwrap(), 2);
        // A second run while one is in progress backs off.
        assert_eq!(concurrent.unwrap(), CleanupReport::default());

        let report = cleaner.clean().await.unwrap();
        assert_eq!(report.sessions_logged_out, 1);
        assert!(cleaner.registry.store().contains(&"TGT-2".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_cleaner_runs_and_stops() {
        let config = CleanerConfig::default()
            .with_start_delay(Duration::from_secs(1))
            .with_repeat_interval(Duration::from_secs(60));
        let (cleaner, _, clock) = setup(config);
        seed_session(&cleaner, "TGT-1", "ST-1", 60).await;
        clock.advance(chrono::Duration::seconds(120));

        let (shutdown, rx) = broadcast::channel(1);
        let handle = Arc::clone(&cleaner).spawn(rx).unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cleaner.registry.store().is_empty());

        shutdown.send(()).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_disabled_cleaner_does_not_spawn() {
        let (cleaner, _, _) = setup(CleanerConfig::default().disabled());
        let (_shutdown, rx) = broadcast::channel(1);
        assert!(cleaner.spawn(rx).is_none());
    }
}
