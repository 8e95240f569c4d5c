//! Single logout.
//!
//! Destroying a ticket-granting ticket ends the SSO session everywhere: every
//! service that received a ticket under it is told to drop its local session.
//!
//! ```text
//! START ─▶ ENUMERATE_DESCENDANTS ─▶ DISPATCH_PER_SERVICE* ─▶ DONE
//!               │                          │
//!               │ TGT services,            │ back-channel: POST logoutRequest
//!               │ PGT services (recursive) │ front-channel: handed to caller
//! ```
//!
//! A failing service never aborts the rest; its request is marked
//! [`LogoutRequestStatus::Failure`] and the outcome reports the partial
//! failure. The tickets are deleted whatever happened to the notifications.

use crate::config::SingleLogoutConfig;
use crate::constants::prefixes;
use crate::error::{Result, TicketError};
use crate::ids::TicketIdGenerator;
use crate::lock::LockRepository;
use crate::metrics as names;
use crate::providers::http::is_success;
use crate::providers::{HttpClient, ServiceRegistry, TicketStore};
use crate::registry::{DeletionReport, TicketRegistry};
use crate::service::{LogoutType, Service};
use crate::ticket::{Ticket, TicketId, TicketKind, TrackedService};
use chrono::{DateTime, SecondsFormat, Utc};
use metrics::counter;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Form field carrying the back-channel message.
pub const LOGOUT_REQUEST_PARAMETER: &str = "logoutRequest";

/// Stages of a logout, logged at each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutPhase {
    /// Logout requested.
    Start,
    /// Collecting every service ticket granted under the session.
    EnumerateDescendants,
    /// Notifying services.
    DispatchPerService,
    /// Tickets deleted, post-processors run.
    Done,
}

impl fmt::Display for LogoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::EnumerateDescendants => "enumerate_descendants",
            Self::DispatchPerService => "dispatch_per_service",
            Self::Done => "done",
        })
    }
}

/// How a logout message reaches a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogoutPropagation {
    /// Server-to-server POST.
    #[default]
    BackChannel,
    /// Delivered by the browser; the caller renders it.
    FrontChannel,
}

/// Delivery state of one logout request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutRequestStatus {
    /// Not sent by the server (front-channel, or not yet dispatched).
    NotAttempted,
    /// Service answered 2xx.
    Success,
    /// Service failed, answered non-2xx or timed out.
    Failure,
    /// Dispatched in the background; result not awaited.
    Queued,
}

/// Logout notification for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutRequest {
    /// Request id (`LR-…`).
    pub id: String,

    /// Service or proxy ticket the service knows the session by.
    pub ticket_id: TicketId,

    /// Service being notified.
    pub service: Service,

    /// Where the message is sent.
    pub logout_url: Url,

    /// Delivery channel.
    pub propagation: LogoutPropagation,

    /// Message payload.
    pub message: String,

    /// Delivery state.
    pub status: LogoutRequestStatus,
}

/// Everything that happened during one logout.
#[derive(Debug, Clone)]
pub struct LogoutOutcome {
    /// Session that was destroyed.
    pub ticket_granting_ticket_id: TicketId,

    /// Principal of the session, if the ticket was found.
    pub principal: Option<String>,

    /// One request per distinct service.
    pub requests: Vec<LogoutRequest>,

    /// Result of the cascading delete.
    pub deletion: DeletionReport,
}

impl LogoutOutcome {
    fn empty(ticket_granting_ticket_id: TicketId) -> Self {
        Self {
            ticket_granting_ticket_id,
            principal: None,
            requests: Vec::new(),
            deletion: DeletionReport::default(),
        }
    }

    /// Requests with `status`.
    pub fn with_status(
        &self,
        status: LogoutRequestStatus,
    ) -> impl Iterator<Item = &LogoutRequest> + '_ {
        self.requests.iter().filter(move |r| r.status == status)
    }

    /// Front-channel requests the caller must deliver through the browser.
    pub fn front_channel_requests(&self) -> impl Iterator<Item = &LogoutRequest> + '_ {
        self.requests
            .iter()
            .filter(|r| r.propagation == LogoutPropagation::FrontChannel)
    }

    /// [`TicketError::LogoutDispatchPartialFailure`] naming the failed
    /// services, or `None` if nothing failed.
    #[must_use]
    pub fn partial_failure(&self) -> Option<TicketError> {
        let services: Vec<String> = self
            .with_status(LogoutRequestStatus::Failure)
            .map(|r| r.service.to_string())
            .collect();
        (!services.is_empty()).then_some(TicketError::LogoutDispatchPartialFailure { services })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Messages
// ═══════════════════════════════════════════════════════════════════════

/// Inputs of a logout message.
#[derive(Debug, Clone, Copy)]
pub struct LogoutMessageContext<'a> {
    /// Request id.
    pub request_id: &'a str,
    /// Session index (service ticket id).
    pub ticket_id: &'a TicketId,
    /// Principal id.
    pub principal: &'a str,
    /// Issue instant.
    pub issued_at: DateTime<Utc>,
}

/// Builds the payload sent to a service.
pub trait LogoutMessageCreator: Send + Sync {
    /// Message for `context`.
    fn create(&self, context: &LogoutMessageContext<'_>) -> String;
}

/// CAS back-channel `LogoutRequest` document (unsigned).
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultLogoutMessageCreator;

impl LogoutMessageCreator for DefaultLogoutMessageCreator {
    fn create(&self, context: &LogoutMessageContext<'_>) -> String {
        format!(
            concat!(
                r#"<samlp:LogoutRequest xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" "#,
                r#"xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" "#,
                r#"ID="{id}" Version="2.0" IssueInstant="{instant}">"#,
                "<saml:NameID>{principal}</saml:NameID>",
                "<samlp:SessionIndex>{session}</samlp:SessionIndex>",
                "</samlp:LogoutRequest>"
            ),
            id = escape_xml(context.request_id),
            instant = context.issued_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            principal = escape_xml(context.principal),
            session = escape_xml(context.ticket_id.as_str()),
        )
    }
}

fn escape_xml(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

// ═══════════════════════════════════════════════════════════════════════
// Post-processing
// ═══════════════════════════════════════════════════════════════════════

/// Runs after the tickets are deleted. Cannot veto the logout.
pub trait LogoutPostProcessor: Send + Sync {
    /// Observe the finished logout.
    fn process(&self, outcome: &LogoutOutcome);
}

/// Records logout metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsLogoutPostProcessor;

impl LogoutPostProcessor for MetricsLogoutPostProcessor {
    fn process(&self, outcome: &LogoutOutcome) {
        counter!(names::LOGOUTS_TOTAL).increment(1);
        for request in &outcome.requests {
            let status = match request.status {
                LogoutRequestStatus::NotAttempted => "not_attempted",
                LogoutRequestStatus::Success => "success",
                LogoutRequestStatus::Failure => "failure",
                LogoutRequestStatus::Queued => "queued",
            };
            counter!(names::LOGOUT_REQUESTS_TOTAL, "status" => status).increment(1);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Manager
// ═══════════════════════════════════════════════════════════════════════

/// Walks a session's descendants, notifies services, deletes the tickets.
pub struct LogoutManager<H, R> {
    http: Arc<H>,
    services: Arc<R>,
    ids: Arc<dyn TicketIdGenerator>,
    creator: Arc<dyn LogoutMessageCreator>,
    post_processors: Vec<Arc<dyn LogoutPostProcessor>>,
    config: SingleLogoutConfig,
}

impl<H, R> fmt::Debug for LogoutManager<H, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogoutManager")
            .field("config", &self.config)
            .field("post_processors", &self.post_processors.len())
            .finish_non_exhaustive()
    }
}

impl<H: HttpClient, R: ServiceRegistry> LogoutManager<H, R> {
    /// Create a manager with the default message creator and the metrics
    /// post-processor.
    #[must_use]
    pub fn new(
        http: Arc<H>,
        services: Arc<R>,
        ids: Arc<dyn TicketIdGenerator>,
        config: SingleLogoutConfig,
    ) -> Self {
        Self {
            http,
            services,
            ids,
            creator: Arc::new(DefaultLogoutMessageCreator),
            post_processors: vec![Arc::new(MetricsLogoutPostProcessor)],
            config,
        }
    }

    /// Replace the message creator.
    #[must_use]
    pub fn with_message_creator(mut self, creator: Arc<dyn LogoutMessageCreator>) -> Self {
        self.creator = creator;
        self
    }

    /// Append a post-processor; they run in insertion order.
    #[must_use]
    pub fn with_post_processor(mut self, processor: Arc<dyn LogoutPostProcessor>) -> Self {
        self.post_processors.push(processor);
        self
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &SingleLogoutConfig {
        &self.config
    }

    /// Log out the session rooted at `tgt_id`.
    ///
    /// Works on expired sessions too. A missing ticket yields an empty
    /// outcome.
    ///
    /// # Errors
    ///
    /// - [`TicketError::InvalidTicketClass`] if `tgt_id` is not a
    ///   ticket-granting ticket
    /// - storage errors if the session could not be read or its root ticket
    ///   not deleted. Notification failures are reported in the outcome instead.
    pub async fn perform_logout<S, L>(
        &self,
        registry: &TicketRegistry<S, L>,
        tgt_id: &TicketId,
    ) -> Result<LogoutOutcome>
    where
        S: TicketStore,
        L: LockRepository,
    {
        tracing::debug!(ticket_id = %tgt_id, phase = %LogoutPhase::Start, "Logout");
        let Some(tgt) = registry.load_ticket(tgt_id).await? else {
            tracing::debug!(ticket_id = %tgt_id, "Logout of unknown session");
            return Ok(LogoutOutcome::empty(tgt_id.clone()));
        };
        if tgt.kind() != TicketKind::TicketGranting {
            return Err(TicketError::InvalidTicketClass {
                id: tgt_id.to_string(),
                expected: TicketKind::TicketGranting.name().to_string(),
                actual: tgt.kind().name().to_string(),
            });
        }
        let mut outcome = LogoutOutcome::empty(tgt_id.clone());
        outcome.principal = tgt.authentication().map(|a| a.principal.id.clone());

        if self.config.disabled {
            tracing::debug!(ticket_id = %tgt_id, "Single logout disabled; skipping notifications");
        } else {
            tracing::debug!(ticket_id = %tgt_id, phase = %LogoutPhase::EnumerateDescendants, "Logout");
            let sessions = Self::enumerate_sessions(registry, &tgt).await;

            tracing::debug!(
                ticket_id = %tgt_id,
                phase = %LogoutPhase::DispatchPerService,
                services = sessions.len(),
                "Logout"
            );
            let principal = outcome.principal.clone().unwrap_or_default();
            let issued_at = registry.now();
            for (ticket_id, service) in sessions {
                if let Some(request) = self
                    .build_request(ticket_id, service, &principal, issued_at)
                    .await
                {
                    outcome.requests.push(request);
                }
            }
            self.dispatch(&mut outcome.requests).await;
        }

        outcome.deletion = registry.delete_ticket(tgt_id).await?;

        for processor in &self.post_processors {
            processor.process(&outcome);
        }

        if let Some(failure) = outcome.partial_failure() {
            tracing::warn!(ticket_id = %tgt_id, error = %failure, "Logout completed with failures");
        }
        tracing::info!(
            ticket_id = %tgt_id,
            phase = %LogoutPhase::Done,
            requests = outcome.requests.len(),
            deleted = outcome.deletion.deleted,
            "Logout"
        );
        Ok(outcome)
    }

    /// Every `(ticket, service)` granted under `tgt`, one per distinct
    /// service: the most recently granted ticket wins.
    async fn enumerate_sessions<S, L>(
        registry: &TicketRegistry<S, L>,
        tgt: &Ticket,
    ) -> Vec<(TicketId, Service)>
    where
        S: TicketStore,
        L: LockRepository,
    {
        let mut granting_tickets = vec![tgt.clone()];
        let mut next = 0;

        while let Some(granting) = granting_tickets.get(next) {
            next += 1;
            let Some(payload) = granting.as_granting() else {
                continue;
            };
            let pgt_ids: Vec<TicketId> = payload.proxy_granting_tickets.keys().cloned().collect();
            for pgt_id in pgt_ids {
                match registry.load_ticket(&pgt_id).await {
                    Ok(Some(pgt)) => granting_tickets.push(pgt),
                    Ok(None) => {}
                    Err(error) => {
                        tracing::warn!(ticket_id = %pgt_id, error = %error, "Skipping unreadable proxy-granting ticket");
                    }
                }
            }
        }

        let mut tracked: Vec<(&TicketId, &TrackedService)> = granting_tickets
            .iter()
            .filter_map(Ticket::as_granting)
            .flat_map(|payload| payload.services.iter())
            .collect();
        tracked.sort_by(|(_, a), (_, b)| (b.granted_at, b.sequence).cmp(&(a.granted_at, a.sequence)));

        let mut seen = BTreeSet::new();
        tracked
            .into_iter()
            .filter(|(_, t)| seen.insert(t.service.normalized().to_string()))
            .map(|(id, t)| (id.clone(), t.service.clone()))
            .collect()
    }

    async fn build_request(
        &self,
        ticket_id: TicketId,
        service: Service,
        principal: &str,
        issued_at: DateTime<Utc>,
    ) -> Option<LogoutRequest> {
        let registered = match self.services.find(&service).await {
            Ok(Some(registered)) => registered,
            Ok(None) => {
                tracing::debug!(service = %service, "Service not registered; no logout");
                return None;
            }
            Err(error) => {
                tracing::warn!(service = %service, error = %error, "Service lookup failed; no logout");
                return None;
            }
        };

        let propagation = match registered.logout_type {
            Some(LogoutType::None) => return None,
            Some(LogoutType::BackChannel) => LogoutPropagation::BackChannel,
            Some(LogoutType::FrontChannel) => LogoutPropagation::FrontChannel,
            None => self.config.propagation,
        };

        let logout_url = match registered.logout_url {
            Some(url) => url,
            None => match Url::parse(&service.id) {
                Ok(url) => url,
                Err(error) => {
                    tracing::warn!(service = %service, error = %error, "Service id is not a URL; no logout");
                    return None;
                }
            },
        };

        let id = self.ids.new_ticket_id(prefixes::LOGOUT_REQUEST).to_string();
        let message = self.creator.create(&LogoutMessageContext {
            request_id: &id,
            ticket_id: &ticket_id,
            principal,
            issued_at,
        });

        Some(LogoutRequest {
            id,
            ticket_id,
            service,
            logout_url,
            propagation,
            message,
            status: LogoutRequestStatus::NotAttempted,
        })
    }

    async fn dispatch(&self, requests: &mut [LogoutRequest]) {
        let back_channel = requests
            .iter_mut()
            .filter(|r| r.propagation == LogoutPropagation::BackChannel);

        if self.config.asynchronous {
            for request in back_channel {
                let http = Arc::clone(&self.http);
                let url = request.logout_url.clone();
                let fields = Self::form(request);
                let timeout = self.config.request_timeout;
                tokio::spawn(async move {
                    let status = send(http.as_ref(), &url, &fields, timeout).await;
                    tracing::debug!(logout_url = %url, ?status, "Queued logout request finished");
                });
                request.status = LogoutRequestStatus::Queued;
            }
            return;
        }

        let sends = back_channel.map(|request| async move {
            let fields = Self::form(request);
            let status = send(
                self.http.as_ref(),
                &request.logout_url,
                &fields,
                self.config.request_timeout,
            )
            .await;
            request.status = status;
        });
        futures::future::join_all(sends).await;
    }

    fn form(request: &LogoutRequest) -> Vec<(String, String)> {
        vec![(LOGOUT_REQUEST_PARAMETER.to_string(), request.message.clone())]
    }
}

/// POST one back-channel message.
async fn send<H: HttpClient>(
    http: &H,
    url: &Url,
    fields: &[(String, String)],
    timeout: Duration,
) -> LogoutRequestStatus {
    match tokio::time::timeout(timeout, http.post_form(url, fields)).await {
        Ok(Ok(status)) if is_success(status) => LogoutRequestStatus::Success,
        Ok(Ok(status)) => {
            tracing::warn!(logout_url = %url, status, "Service rejected logout request");
            LogoutRequestStatus::Failure
        }
        Ok(Err(error)) => {
            tracing::warn!(logout_url = %url, error = %error, "Logout request failed");
            LogoutRequestStatus::Failure
        }
        Err(_) => {
            tracing::warn!(logout_url = %url, "Logout request timed out");
            LogoutRequestStatus::Failure
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sso_testing::test_epoch;

    #[test]
    fn test_message_carries_session_index_and_escapes() {
        let message = DefaultLogoutMessageCreator.create(&LogoutMessageContext {
            request_id: "LR-1",
            ticket_id: &"ST-1".into(),
            principal: "a<b>&c",
            issued_at: test_epoch(),
        });
        assert!(message.contains("<samlp:SessionIndex>ST-1</samlp:SessionIndex>"));
        assert!(message.contains("<saml:NameID>a&lt;b&gt;&amp;c</saml:NameID>"));
        assert!(message.contains(r#"IssueInstant="2025-01-01T00:00:00Z""#));
        assert!(message.contains(r#"ID="LR-1""#));
    }

    #[test]
    fn test_partial_failure_lists_failed_services() {
        let request = |service: &str, status| LogoutRequest {
            id: "LR-1".into(),
            ticket_id: "ST-1".into(),
            service: Service::new(service),
            logout_url: Url::parse(service).unwrap(),
            propagation: LogoutPropagation::BackChannel,
            message: String::new(),
            status,
        };
        let mut outcome = LogoutOutcome::empty("TGT-1".into());
        assert!(outcome.partial_failure().is_none());

        outcome.requests = vec![
            request("https://a.example", LogoutRequestStatus::Success),
            request("https://b.example", LogoutRequestStatus::Failure),
        ];
        assert_eq!(
            outcome.partial_failure(),
            Some(TicketError::LogoutDispatchPartialFailure {
                services: vec!["https://b.example".into()]
            })
        );
    }
}
