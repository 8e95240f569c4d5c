//! Central ticket service.
//!
//! Wires the registry, the proxy handler and the logout manager into the
//! protocol-level operations a CAS server exposes:
//!
//! ```text
//! authentication ──▶ TGT ──grant──▶ ST ──validate──▶ Assertion
//!                     │               └─proxy callback─▶ PGT ──grant──▶ PT ──validate──▶ Assertion
//!                     └──destroy──▶ single logout + cascade delete
//! ```
//!
//! Every grant runs inside the granting ticket's critical section (see
//! [`TicketRegistry::grant_child`]); every validation consumes the presented
//! ticket under its own.

use crate::authentication::{Authentication, Principal};
use crate::config::TicketConfig;
use crate::constants::prefixes;
use crate::error::{Result, TicketError};
use crate::ids::TicketIdGenerator;
use crate::lock::LockRepository;
use crate::logout::{LogoutManager, LogoutOutcome};
use crate::providers::{HttpClient, ServiceRegistry, TicketStore};
use crate::proxy::{ProxyHandler, ServiceCredentials, authorize_proxy_callback, authorize_proxy_chain};
use crate::registry::TicketRegistry;
use crate::service::{RegisteredService, Service};
use crate::ticket::{ChildTicketSpec, Ticket, TicketId, TicketKind};
use std::sync::Arc;

/// Handler name recorded on proxy-granting ticket authentications.
const PROXY_CALLBACK_HANDLER: &str = "proxy-callback";

/// Result of a successful ticket validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assertion {
    /// Validated ticket.
    pub ticket_id: TicketId,

    /// Service the ticket was issued for.
    pub service: Service,

    /// Authentications from the root session down to the granting ticket.
    pub chained_authentications: Vec<Authentication>,

    /// Ticket was issued right after the user presented credentials.
    pub from_new_login: bool,

    /// Proxies the ticket went through, most recent first. Empty for
    /// service tickets.
    pub proxy_chain: Vec<Service>,
}

impl Assertion {
    /// Authentication of the root session.
    #[must_use]
    pub fn primary_authentication(&self) -> Option<&Authentication> {
        self.chained_authentications.first()
    }

    /// Principal of the root session.
    #[must_use]
    pub fn principal(&self) -> Option<&Principal> {
        self.primary_authentication().map(|a| &a.principal)
    }
}

/// Proxy-granting ticket delivered to a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyGrantingOutcome {
    /// The ticket itself; only the callback endpoint ever sees it.
    pub pgt_id: TicketId,

    /// IOU for the validation response.
    pub pgt_iou: String,
}

/// Protocol-level ticket operations.
pub struct CentralTicketService<S, L, H, R, P> {
    registry: Arc<TicketRegistry<S, L>>,
    services: Arc<R>,
    proxy: P,
    logout: Arc<LogoutManager<H, R>>,
    ids: Arc<dyn TicketIdGenerator>,
    config: TicketConfig,
}

impl<S, L, H, R, P> std::fmt::Debug for CentralTicketService<S, L, H, R, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CentralTicketService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S, L, H, R, P> CentralTicketService<S, L, H, R, P>
where
    S: TicketStore,
    L: LockRepository,
    H: HttpClient,
    R: ServiceRegistry,
    P: ProxyHandler,
{
    /// Assemble the service from its collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<TicketRegistry<S, L>>,
        services: Arc<R>,
        proxy: P,
        logout: Arc<LogoutManager<H, R>>,
        ids: Arc<dyn TicketIdGenerator>,
        config: TicketConfig,
    ) -> Self {
        Self {
            registry,
            services,
            proxy,
            logout,
            ids,
            config,
        }
    }

    /// Registry backing this service.
    #[must_use]
    pub fn registry(&self) -> &Arc<TicketRegistry<S, L>> {
        &self.registry
    }

    /// Logout manager used on session destruction.
    #[must_use]
    pub fn logout_manager(&self) -> &Arc<LogoutManager<H, R>> {
        &self.logout
    }

    // ═══════════════════════════════════════════════════════════
    // Sessions
    // ═══════════════════════════════════════════════════════════

    /// Open an SSO session for a fresh authentication.
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketAlreadyExists`] on id collision
    /// - storage errors
    pub async fn create_ticket_granting_ticket(
        &self,
        authentication: Authentication,
    ) -> Result<Ticket> {
        let id = self.ids.new_ticket_id(prefixes::TICKET_GRANTING_TICKET);
        let principal = authentication.principal.id.clone();
        let ticket = Ticket::ticket_granting(
            id,
            authentication,
            self.config.tgt.policy(),
            self.registry.now(),
        );
        self.registry.add_ticket(&ticket).await?;

        tracing::info!(ticket_id = %ticket.id(), principal = %principal, "SSO session created");
        Ok(ticket)
    }

    /// End an SSO session: notify services, then delete the session and
    /// everything granted under it.
    ///
    /// # Errors
    ///
    /// See [`LogoutManager::perform_logout`].
    pub async fn destroy_ticket_granting_ticket(&self, tgt_id: &TicketId) -> Result<LogoutOutcome> {
        self.logout.perform_logout(&self.registry, tgt_id).await
    }

    // ═══════════════════════════════════════════════════════════
    // Service tickets
    // ═══════════════════════════════════════════════════════════

    /// Grant a service ticket for `service` from the session `tgt_id`.
    ///
    /// `credentials_provided` is `true` when the user has just logged in for
    /// this request. Services that opted out of SSO get tickets only in that
    /// case (or from a brand-new session).
    ///
    /// # Errors
    ///
    /// - [`TicketError::UnauthorizedService`] if the service is unregistered,
    ///   or opted out of SSO and no credentials were provided
    /// - [`TicketError::TicketCreation`] if the session is gone, expired or
    ///   throttled
    /// - [`TicketError::LockTimeout`], storage errors
    pub async fn grant_service_ticket(
        &self,
        tgt_id: &TicketId,
        service: &Service,
        credentials_provided: bool,
    ) -> Result<Ticket> {
        let registered = self.authorize_service(service).await?;
        let id = self.ids.new_ticket_id(prefixes::SERVICE_TICKET);
        let spec = ChildTicketSpec {
            policy: self.config.st.policy(),
            reusable: self.config.st.reusable,
            only_track_most_recent_session: self.config.tgt.only_track_most_recent_session,
        };
        let service = service.clone();

        self.registry
            .grant_child(tgt_id, TicketKind::TicketGranting, move |tgt, now| {
                if !registered.sso_enabled && !credentials_provided && tgt.count_of_uses() > 0 {
                    tracing::warn!(
                        ticket_id = %tgt.id(),
                        service = %service,
                        "Service requires fresh credentials"
                    );
                    return Err(TicketError::UnauthorizedService {
                        service: service.to_string(),
                    });
                }
                tgt.grant_service_ticket(id, service, spec, credentials_provided, now)
            })
            .await
    }

    /// Validate a service ticket presented by `service`.
    ///
    /// The ticket is consumed whatever the result, so a ticket presented by
    /// the wrong service cannot be retried.
    ///
    /// # Errors
    ///
    /// - [`TicketError::TicketNotFound`] if absent, expired, already used, or
    ///   its session is no longer live
    /// - [`TicketError::ServiceMismatch`] if issued for another service
    /// - [`TicketError::UnauthorizedService`] if the service is unregistered
    pub async fn validate_service_ticket(
        &self,
        st_id: &TicketId,
        service: &Service,
    ) -> Result<Assertion> {
        self.validate(st_id, TicketKind::Service, service).await
    }

    // ═══════════════════════════════════════════════════════════
    // Proxying
    // ═══════════════════════════════════════════════════════════

    /// Delegate a proxy-granting ticket to the service that received
    /// `ticket_id` (a service or proxy ticket, not yet validated).
    ///
    /// The PGT is attached to the ticket's granting ticket, delivered to the
    /// callback, and removed again if delivery fails. A ticket delegates at
    /// most one PGT, even if that delivery failed.
    ///
    /// # Returns
    ///
    /// `None` if the configured proxy handler does not proxy.
    ///
    /// # Errors
    ///
    /// - [`TicketError::UnauthorizedProxying`] if the service's proxy policy
    ///   refuses the callback
    /// - [`TicketError::ProxyCallbackFailed`] if delivery failed
    /// - [`TicketError::TicketCreation`] if `ticket_id` already delegated one
    /// - lookup and creation errors for `ticket_id` and its granting ticket
    pub async fn grant_proxy_granting_ticket(
        &self,
        ticket_id: &TicketId,
        credentials: &ServiceCredentials,
    ) -> Result<Option<ProxyGrantingOutcome>> {
        let ticket = self.registry.find_ticket(ticket_id).await?;
        let (Some(service), Some(parent_id)) = (ticket.service(), ticket.parent_id()) else {
            return Err(TicketError::InvalidTicketClass {
                id: ticket_id.to_string(),
                expected: "service or proxy".to_string(),
                actual: ticket.kind().name().to_string(),
            });
        };
        let parent_id = parent_id.clone();

        let registered = self.authorize_service(service).await?;
        authorize_proxy_callback(&registered, credentials)?;
        if !self.proxy.can_handle(credentials) {
            tracing::debug!(callback_url = %credentials.callback_url, "Proxy handler does not proxy");
            return Ok(None);
        }

        let parent_kind = self.registry.find_ticket(&parent_id).await?.kind();
        let pgt_id = self.ids.new_ticket_id(prefixes::PROXY_GRANTING_TICKET);
        let proxied_by = credentials.service();
        let authentication = Authentication::new(
            Principal::new(credentials.callback_url.as_str()),
            self.registry.now(),
        )
        .with_handler(PROXY_CALLBACK_HANDLER);
        let policy = self.config.pgt.policy();

        {
            let pgt_id = pgt_id.clone();
            self.registry
                .mutate_ticket(ticket_id, ticket.kind(), move |ticket, _| {
                    ticket.claim_proxy_granting_ticket(pgt_id)
                })
                .await?;
        }

        let pgt = {
            let pgt_id = pgt_id.clone();
            self.registry
                .grant_child(&parent_id, parent_kind, move |parent, now| {
                    parent.grant_proxy_granting_ticket(pgt_id, proxied_by, authentication, policy, now)
                })
                .await?
        };

        match self.proxy.handle(credentials, pgt.id()).await {
            Ok(Some(pgt_iou)) => Ok(Some(ProxyGrantingOutcome { pgt_id, pgt_iou })),
            Ok(None) => {
                self.discard_proxy_granting_ticket(&parent_id, parent_kind, &pgt_id)
                    .await;
                Ok(None)
            }
            Err(error) => {
                self.discard_proxy_granting_ticket(&parent_id, parent_kind, &pgt_id)
                    .await;
                Err(error)
            }
        }
    }

    /// Grant a proxy ticket for `service` from the proxy-granting ticket
    /// `pgt_id`.
    ///
    /// # Errors
    ///
    /// - [`TicketError::UnauthorizedService`] if the service is unregistered
    /// - [`TicketError::TicketCreation`] if the PGT is gone or expired
    /// - [`TicketError::LockTimeout`], storage errors
    pub async fn grant_proxy_ticket(&self, pgt_id: &TicketId, service: &Service) -> Result<Ticket> {
        self.authorize_service(service).await?;
        let proxy_chain = self.proxy_chain_of(pgt_id).await?;
        let id = self.ids.new_ticket_id(prefixes::PROXY_TICKET);
        let spec = ChildTicketSpec {
            policy: self.config.pt.policy(),
            reusable: self.config.pt.reusable,
            only_track_most_recent_session: self.config.tgt.only_track_most_recent_session,
        };
        let service = service.clone();

        self.registry
            .grant_child(pgt_id, TicketKind::ProxyGranting, move |pgt, now| {
                pgt.grant_proxy_ticket(id, service, proxy_chain, spec, now)
            })
            .await
    }

    /// Validate a proxy ticket presented by `service`.
    ///
    /// # Errors
    ///
    /// As [`Self::validate_service_ticket`], plus
    /// [`TicketError::UnauthorizedProxying`] if the service does not trust
    /// the proxy chain.
    pub async fn validate_proxy_ticket(
        &self,
        pt_id: &TicketId,
        service: &Service,
    ) -> Result<Assertion> {
        self.validate(pt_id, TicketKind::Proxy, service).await
    }

    // ═══════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════

    async fn authorize_service(&self, service: &Service) -> Result<RegisteredService> {
        self.services.find(service).await?.ok_or_else(|| {
            tracing::warn!(service = %service, "Service is not registered");
            TicketError::UnauthorizedService {
                service: service.to_string(),
            }
        })
    }

    async fn validate(&self, id: &TicketId, kind: TicketKind, service: &Service) -> Result<Assertion> {
        let ticket = self.registry.consume_ticket(id, kind).await?;
        let (Some(issued_for), Some(granting_id)) = (ticket.service(), ticket.parent_id()) else {
            return Err(TicketError::Internal(format!(
                "ticket {id} has no service or granting ticket"
            )));
        };

        if !issued_for.matches(service) {
            tracing::warn!(
                ticket_id = %id,
                issued_for = %issued_for,
                presented_by = %service,
                "Ticket presented by the wrong service"
            );
            return Err(TicketError::ServiceMismatch {
                id: id.to_string(),
                service: service.to_string(),
            });
        }

        let registered = self.authorize_service(service).await?;
        authorize_proxy_chain(ticket.proxy_chain(), &registered)?;

        if let Err(error) = self.registry.find_ticket(granting_id).await {
            tracing::debug!(ticket_id = %id, granting_ticket_id = %granting_id, error = %error, "Granting ticket not live");
            return Err(TicketError::not_found(id));
        }

        let from_new_login = ticket
            .as_service_ticket()
            .is_some_and(|st| st.from_new_login);
        let chained_authentications = self.registry.chained_authentications(granting_id).await?;

        tracing::info!(ticket_id = %id, service = %service, kind = %kind, "Ticket validated");
        Ok(Assertion {
            ticket_id: id.clone(),
            service: issued_for.clone(),
            chained_authentications,
            from_new_login,
            proxy_chain: ticket.proxy_chain().to_vec(),
        })
    }

    /// Services `pgt_id` and its ancestors were delegated to, most recent first.
    async fn proxy_chain_of(&self, pgt_id: &TicketId) -> Result<Vec<Service>> {
        let mut chain = Vec::new();
        let mut next = Some(pgt_id.clone());
        while let Some(current) = next.take() {
            let Some(ticket) = self.registry.load_ticket(&current).await? else {
                break;
            };
            if let Some(proxied_by) = ticket.as_granting().and_then(|g| g.proxied_by.as_ref()) {
                chain.push(proxied_by.clone());
            }
            next = ticket.parent_id().cloned();
        }
        Ok(chain)
    }

    async fn discard_proxy_granting_ticket(
        &self,
        parent_id: &TicketId,
        parent_kind: TicketKind,
        pgt_id: &TicketId,
    ) {
        if let Err(error) = self.registry.delete_ticket(pgt_id).await {
            tracing::warn!(ticket_id = %pgt_id, error = %error, "Failed to remove undelivered proxy-granting ticket");
        }
        let forget = self
            .registry
            .mutate_ticket(parent_id, parent_kind, |parent, _| {
                parent.forget_child(pgt_id);
                Ok(())
            })
            .await;
        if let Err(error) = forget {
            tracing::debug!(ticket_id = %parent_id, error = %error, "Could not detach proxy-granting ticket");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProxyTicketConfig, TicketGrantingTicketConfig};
    use crate::lock::NoOpLockRepository;
    use crate::mocks::{MockHttpClient, MockServiceRegistry, SequentialTicketIdGenerator};
    use crate::proxy::Cas20ProxyHandler;
    use crate::service::ProxyPolicy;
    use crate::stores::InMemoryTicketStore;
    use reqwest::Url;
    use sso_testing::{ManualClock, manual_test_clock, test_epoch};
    use std::time::Duration;

    type Cas = CentralTicketService<
        InMemoryTicketStore,
        NoOpLockRepository,
        MockHttpClient,
        MockServiceRegistry,
        Cas20ProxyHandler<MockHttpClient>,
    >;

    const APP: &str = "https://app.example";

    fn setup(services: MockServiceRegistry) -> (Cas, MockHttpClient, ManualClock) {
        setup_with(services, TicketConfig::default())
    }

    fn setup_with(
        services: MockServiceRegistry,
        config: TicketConfig,
    ) -> (Cas, MockHttpClient, ManualClock) {
        let clock = manual_test_clock();
        let http = Arc::new(MockHttpClient::new());
        let services = Arc::new(services);
        let ids: Arc<dyn TicketIdGenerator> = Arc::new(SequentialTicketIdGenerator::new());
        let registry = Arc::new(TicketRegistry::new(
            InMemoryTicketStore::new(),
            NoOpLockRepository,
            Arc::new(clock.clone()),
            config.registry.clone(),
        ));
        let logout = Arc::new(LogoutManager::new(
            Arc::clone(&http),
            Arc::clone(&services),
            Arc::clone(&ids),
            config.slo.clone(),
        ));
        let proxy = Cas20ProxyHandler::new(Arc::clone(&http), Arc::clone(&ids));
        let cas = CentralTicketService::new(registry, services, proxy, logout, ids, config);
        (cas, (*http).clone(), clock)
    }

    fn services() -> MockServiceRegistry {
        MockServiceRegistry::new()
            .with_service(
                RegisteredService::new(1, "app", APP).with_proxy_policy(ProxyPolicy::Allow {
                    callback_prefix: "https://app.example/".into(),
                }),
            )
            .with_service(RegisteredService::new(2, "backend", "https://backend.example"))
    }

    fn authentication() -> Authentication {
        Authentication::new(Principal::new("casuser"), test_epoch())
    }

    #[tokio::test]
    async fn test_grant_and_validate_service_ticket() {
        let (cas, _, _) = setup(services());
        let tgt = cas.create_ticket_granting_ticket(authentication()).await.unwrap();
        let st = cas
            .grant_service_ticket(tgt.id(), &Service::new(APP), false)
            .await
            .unwrap();

        let assertion = cas
            .validate_service_ticket(st.id(), &Service::new(APP))
            .await
            .unwrap();
        assert_eq!(assertion.principal().unwrap().id, "casuser");
        assert!(assertion.from_new_login);
        assert!(assertion.proxy_chain.is_empty());

        let err = cas
            .validate_service_ticket(st.id(), &Service::new(APP))
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::TicketNotFound { .. }));
    }

    #[tokio::test]
    async fn test_unregistered_service_is_refused() {
        let (cas, _, _) = setup(services());
        let tgt = cas.create_ticket_granting_ticket(authentication()).await.unwrap();
        let err = cas
            .grant_service_ticket(tgt.id(), &Service::new("https://rogue.example"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::UnauthorizedService { .. }));
    }

    #[tokio::test]
    async fn test_wrong_service_consumes_ticket() {
        let (cas, _, _) = setup(services());
        let tgt = cas.create_ticket_granting_ticket(authentication()).await.unwrap();
        let st = cas
            .grant_service_ticket(tgt.id(), &Service::new(APP), false)
            .await
            .unwrap();

        let err = cas
            .validate_service_ticket(st.id(), &Service::new("https://backend.example"))
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::ServiceMismatch { .. }));
        assert!(
            cas.validate_service_ticket(st.id(), &Service::new(APP))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_sso_disabled_service_requires_credentials() {
        let registry = services().with_service(
            RegisteredService::new(3, "strict", "https://strict.example").without_sso(),
        );
        let (cas, _, _) = setup(registry);
        let tgt = cas.create_ticket_granting_ticket(authentication()).await.unwrap();
        let strict = Service::new("https://strict.example");

        // First ticket of a session counts as a new login.
        cas.grant_service_ticket(tgt.id(), &strict, false).await.unwrap();
        let err = cas
            .grant_service_ticket(tgt.id(), &strict, false)
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::UnauthorizedService { .. }));
        assert!(cas.grant_service_ticket(tgt.id(), &strict, true).await.is_ok());
    }

    #[tokio::test]
    async fn test_validation_fails_once_session_expired() {
        let (cas, _, _) = setup(services());
        let tgt = cas.create_ticket_granting_ticket(authentication()).await.unwrap();
        let st = cas
            .grant_service_ticket(tgt.id(), &Service::new(APP), false)
            .await
            .unwrap();

        cas.registry()
            .mutate_ticket(tgt.id(), TicketKind::TicketGranting, |t, _| {
                t.mark_expired();
                Ok(())
            })
            .await
            .unwrap();

        let err = cas
            .validate_service_ticket(st.id(), &Service::new(APP))
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::TicketNotFound { .. }));
    }

    #[tokio::test]
    async fn test_proxy_flow() {
        let (cas, http, _) = setup(services());
        let tgt = cas.create_ticket_granting_ticket(authentication()).await.unwrap();
        let st = cas
            .grant_service_ticket(tgt.id(), &Service::new(APP), false)
            .await
            .unwrap();

        let credentials =
            ServiceCredentials::new(Url::parse("https://app.example/proxy-callback").unwrap());
        let outcome = cas
            .grant_proxy_granting_ticket(st.id(), &credentials)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(outcome.pgt_iou, outcome.pgt_id.as_str());
        assert!(!outcome.pgt_iou.contains(outcome.pgt_id.as_str()));
        assert_eq!(http.requests().len(), 2);

        cas.validate_service_ticket(st.id(), &Service::new(APP))
            .await
            .unwrap();

        let backend = Service::new("https://backend.example");
        let pt = cas.grant_proxy_ticket(&outcome.pgt_id, &backend).await.unwrap();
        let assertion = cas.validate_proxy_ticket(pt.id(), &backend).await.unwrap();
        assert_eq!(assertion.proxy_chain, vec![credentials.service()]);
        assert_eq!(assertion.chained_authentications.len(), 2);
        assert_eq!(assertion.principal().unwrap().id, "casuser");
    }

    #[tokio::test]
    async fn test_failed_callback_removes_pgt() {
        let (cas, http, _) = setup(services());
        http.respond_with("https://app.example/proxy-callback", 500);
        let tgt = cas.create_ticket_granting_ticket(authentication()).await.unwrap();
        let st = cas
            .grant_service_ticket(tgt.id(), &Service::new(APP), false)
            .await
            .unwrap();

        let credentials =
            ServiceCredentials::new(Url::parse("https://app.example/proxy-callback").unwrap());
        let err = cas
            .grant_proxy_granting_ticket(st.id(), &credentials)
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::ProxyCallbackFailed { .. }));

        assert_eq!(cas.registry().count(TicketKind::ProxyGranting).await.unwrap(), 0);
        let tgt = cas.registry().find_ticket(tgt.id()).await.unwrap();
        assert!(tgt.as_granting().unwrap().proxy_granting_tickets.is_empty());
    }

    #[tokio::test]
    async fn test_proxy_policy_refuses_foreign_callback() {
        let (cas, http, _) = setup(services());
        let tgt = cas.create_ticket_granting_ticket(authentication()).await.unwrap();
        let st = cas
            .grant_service_ticket(tgt.id(), &Service::new(APP), false)
            .await
            .unwrap();

        let credentials =
            ServiceCredentials::new(Url::parse("https://elsewhere.example/cb").unwrap());
        let err = cas
            .grant_proxy_granting_ticket(st.id(), &credentials)
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::UnauthorizedProxying { .. }));
        assert!(http.requests().is_empty());
    }

    /// Session with a one-minute idle timeout, its ST validated and a PGT
    /// delegated to the app's callback.
    async fn short_session_with_pgt() -> (Cas, ManualClock, TicketId) {
        let config = TicketConfig::default()
            .with_tgt(TicketGrantingTicketConfig::default().with_time_to_kill(Duration::from_secs(60)))
            .with_pt(ProxyTicketConfig::default().with_time_to_kill(Duration::from_secs(600)));
        let (cas, _, clock) = setup_with(services(), config);
        let tgt = cas.create_ticket_granting_ticket(authentication()).await.unwrap();
        let st = cas
            .grant_service_ticket(tgt.id(), &Service::new(APP), false)
            .await
            .unwrap();
        let credentials =
            ServiceCredentials::new(Url::parse("https://app.example/proxy-callback").unwrap());
        let outcome = cas
            .grant_proxy_granting_ticket(st.id(), &credentials)
            .await
            .unwrap()
            .unwrap();
        cas.validate_service_ticket(st.id(), &Service::new(APP))
            .await
            .unwrap();
        (cas, clock, outcome.pgt_id)
    }

    #[tokio::test]
    async fn test_proxy_tickets_die_with_their_session() {
        let (cas, clock, pgt_id) = short_session_with_pgt().await;
        let backend = Service::new("https://backend.example");
        let pt = cas.grant_proxy_ticket(&pgt_id, &backend).await.unwrap();

        clock.advance(chrono::Duration::seconds(61));

        let err = cas.grant_proxy_ticket(&pgt_id, &backend).await.unwrap_err();
        assert!(matches!(err, TicketError::TicketCreation { .. }));
        let err = cas.validate_proxy_ticket(pt.id(), &backend).await.unwrap_err();
        assert!(matches!(err, TicketError::TicketNotFound { .. }));
        assert_eq!(cas.registry().session_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_proxy_ticket_outstanding_when_session_expires_is_rejected() {
        let (cas, clock, pgt_id) = short_session_with_pgt().await;
        let backend = Service::new("https://backend.example");

        clock.advance(chrono::Duration::seconds(59));
        let pt = cas.grant_proxy_ticket(&pgt_id, &backend).await.unwrap();
        // The grant restarted the session's idle clock.
        clock.advance(chrono::Duration::seconds(59));
        let pt2 = cas.grant_proxy_ticket(&pgt_id, &backend).await.unwrap();
        cas.validate_proxy_ticket(pt.id(), &backend).await.unwrap();

        clock.advance(chrono::Duration::seconds(61));
        let err = cas.validate_proxy_ticket(pt2.id(), &backend).await.unwrap_err();
        assert!(matches!(err, TicketError::TicketNotFound { .. }));
    }

    #[tokio::test]
    async fn test_service_ticket_delegates_one_proxy_granting_ticket() {
        let (cas, _, _) = setup(services());
        let tgt = cas.create_ticket_granting_ticket(authentication()).await.unwrap();
        let st = cas
            .grant_service_ticket(tgt.id(), &Service::new(APP), false)
            .await
            .unwrap();
        let credentials =
            ServiceCredentials::new(Url::parse("https://app.example/proxy-callback").unwrap());

        cas.grant_proxy_granting_ticket(st.id(), &credentials)
            .await
            .unwrap()
            .unwrap();
        let err = cas
            .grant_proxy_granting_ticket(st.id(), &credentials)
            .await
            .unwrap_err();
        assert!(matches!(err, TicketError::TicketCreation { .. }));
        assert_eq!(cas.registry().count(TicketKind::ProxyGranting).await.unwrap(), 1);

        // ST grant and PGT grant both count as session uses.
        let tgt = cas.registry().find_ticket(tgt.id()).await.unwrap();
        assert_eq!(tgt.count_of_uses(), 2);
    }
}
