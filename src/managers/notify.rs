//! Alert rules and the alerts inbox, webhook subscriptions, notification targets and
//! their delivery records.
//!
//! [`NotifyManager`] is registered as an [`EventSink`] on the bus: every published
//! event is matched against rules (raising or deduplicating alerts) inline, then queued
//! for matching webhooks and targets. Queued deliveries run on a dedicated outbox
//! thread, so a slow endpoint never holds up the request that published the event.
//! Deliveries never publish events themselves.

use super::{now, require, require_lower, ManagerError, ManagerResult};
use crate::crypto::sha256_hex;
use crate::events::{Event, EventSink};
use crate::ids::new_id;
use crate::store::Collection;
use chrono::{DateTime, Utc};
use may::sync::mpsc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Deliveries waiting on the outbox beyond this are recorded as failed, unattempted.
pub const OUTBOX_CAPACITY: usize = 1024;

/// Outbound transport for webhook and chat-style deliveries.
pub trait Deliverer: Send + Sync {
    /// POST `payload` to `url`; returns the response status.
    fn deliver(&self, url: &str, payload: &Value) -> Result<u16, String>;
}

/// Blocking reqwest client with a per-request timeout.
pub struct HttpDeliverer {
    client: reqwest::blocking::Client,
}

impl HttpDeliverer {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("masterchef/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

impl Deliverer for HttpDeliverer {
    fn deliver(&self, url: &str, payload: &Value) -> Result<u16, String> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(format!("endpoint returned {status}"))
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub event_prefix: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub field: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub equals: Value,
    pub severity: String,
    pub created_at: DateTime<Utc>,
}

impl AlertRule {
    fn matches(&self, event: &Event) -> bool {
        if !event.matches_prefix(&self.event_prefix) {
            return false;
        }
        if self.field.is_empty() {
            return true;
        }
        match event.fields.get(&self.field) {
            Some(actual) if self.equals.is_null() => !actual.is_null(),
            Some(actual) => super::loose_eq(actual, &self.equals),
            None => false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuleInput {
    pub name: String,
    pub event_prefix: String,
    pub field: String,
    pub equals: Value,
    pub severity: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Open => "open",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Resolved => "resolved",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: String,
    pub fingerprint: String,
    pub status: AlertStatus,
    pub message: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub event_type: String,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ManualAlertInput {
    pub message: String,
    pub severity: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Webhook {
    pub id: String,
    pub name: String,
    pub url: String,
    pub event_prefix: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WebhookInput {
    pub name: String,
    pub url: String,
    pub event_prefix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Slack,
    Email,
    Pagerduty,
    Webhook,
}

impl TargetKind {
    fn parse(raw: &str) -> ManagerResult<Self> {
        match raw {
            "slack" => Ok(TargetKind::Slack),
            "email" => Ok(TargetKind::Email),
            "pagerduty" => Ok(TargetKind::Pagerduty),
            "webhook" => Ok(TargetKind::Webhook),
            other => Err(ManagerError::invalid(format!(
                "kind must be slack, email, pagerduty or webhook (got {other})"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationTarget {
    pub id: String,
    pub name: String,
    pub kind: TargetKind,
    pub address: String,
    pub event_prefix: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TargetInput {
    pub name: String,
    pub kind: String,
    pub address: String,
    pub event_prefix: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TestDeliveryInput {
    pub target_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub id: String,
    /// `webhook` or `target`
    pub channel: &'static str,
    pub destination_id: String,
    pub destination: String,
    pub event_type: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

identified!(AlertRule, Alert, Webhook, NotificationTarget, Delivery);

pub struct NotifyManager {
    deliverer: Arc<dyn Deliverer>,
    rules: Collection<AlertRule>,
    alerts: Collection<Alert>,
    webhooks: Collection<Webhook>,
    targets: Collection<NotificationTarget>,
    deliveries: Arc<Collection<Delivery>>,
    outbox: Outbox,
}

/// One queued delivery.
struct Dispatch {
    channel: &'static str,
    destination_id: String,
    destination: String,
    address: String,
    event_type: String,
    payload: Arc<Value>,
}

/// Channel into the outbox thread plus the count of deliveries not yet recorded.
struct Outbox {
    sender: Mutex<mpsc::Sender<Dispatch>>,
    pending: Arc<AtomicUsize>,
}

impl Outbox {
    fn start(deliverer: Arc<dyn Deliverer>, log: Arc<Collection<Delivery>>) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel::<Dispatch>();
        let pending = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::clone(&pending);
        thread::Builder::new()
            .name("masterchef-outbox".to_string())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        deliverer.deliver(&job.address, &job.payload)
                    }))
                    .unwrap_or_else(|_| {
                        error!(destination = %job.destination, "Deliverer panicked - CRITICAL");
                        Err("deliverer panicked".to_string())
                    });
                    record_delivery(
                        &log,
                        job.channel,
                        &job.destination_id,
                        &job.destination,
                        &job.event_type,
                        outcome,
                    );
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
                debug!("notification outbox stopped");
            })?;
        Ok(Self {
            sender: Mutex::new(tx),
            pending,
        })
    }
}

fn record_delivery(
    log: &Collection<Delivery>,
    channel: &'static str,
    id: &str,
    name: &str,
    event_type: &str,
    outcome: Result<u16, String>,
) -> Delivery {
    let (status, status_code, error) = match outcome {
        Ok(code) => ("delivered", Some(code), None),
        Err(e) => {
            warn!(channel, destination = %name, error = %e, "notification delivery failed");
            ("failed", None, Some(e))
        }
    };
    log.insert(Delivery {
        id: new_id("delivery"),
        channel,
        destination_id: id.to_string(),
        destination: name.to_string(),
        event_type: event_type.to_string(),
        status,
        status_code,
        error,
        attempted_at: now(),
    })
}

fn normalize_severity(raw: &str) -> ManagerResult<String> {
    match raw.trim().to_lowercase().as_str() {
        "" | "warning" => Ok("warning".to_string()),
        s @ ("info" | "critical") => Ok(s.to_string()),
        other => Err(ManagerError::invalid(format!(
            "severity must be info, warning or critical (got {other})"
        ))),
    }
}

fn require_url(field: &str, raw: &str) -> ManagerResult<String> {
    let raw = require(field, raw)?;
    let parsed = url::Url::parse(&raw).map_err(|e| ManagerError::invalid(format!("invalid {field}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ManagerError::invalid(format!("{field} must be http or https")));
    }
    Ok(raw)
}

impl NotifyManager {
    /// Starts the outbox thread; it exits once the manager is dropped.
    pub fn new(deliverer: Arc<dyn Deliverer>) -> io::Result<Self> {
        let deliveries = Arc::new(Collection::new());
        let outbox = Outbox::start(Arc::clone(&deliverer), Arc::clone(&deliveries))?;
        Ok(Self {
            deliverer,
            rules: Collection::new(),
            alerts: Collection::new(),
            webhooks: Collection::new(),
            targets: Collection::new(),
            deliveries,
            outbox,
        })
    }

    /// Deliveries queued but not yet recorded.
    pub fn pending_deliveries(&self) -> usize {
        self.outbox.pending.load(Ordering::SeqCst)
    }

    /// Wait until every queued delivery has been recorded; `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        while self.pending_deliveries() > 0 {
            if started.elapsed() >= timeout {
                return false;
            }
            if may::coroutine::is_coroutine() {
                may::coroutine::sleep(Duration::from_millis(5));
            } else {
                thread::sleep(Duration::from_millis(5));
            }
        }
        true
    }

    pub fn create_rule(&self, input: RuleInput) -> ManagerResult<AlertRule> {
        let name = require("name", &input.name)?;
        let rule = AlertRule {
            id: new_id("rule"),
            name: name.clone(),
            event_prefix: require("event_prefix", &input.event_prefix)?,
            field: input.field.trim().to_string(),
            equals: input.equals,
            severity: normalize_severity(&input.severity)?,
            created_at: now(),
        };
        self.rules.insert_unique(rule, |r| r.name == name, "rule")
    }

    pub fn list_rules(&self, limit: usize) -> Vec<AlertRule> {
        self.rules.list(limit)
    }

    /// Raise an alert or bump the counter of the open one with the same
    /// `(rule, fingerprint)`. Returns the alert and whether it is new.
    fn raise(&self, rule_id: &str, rule_name: &str, severity: &str, fingerprint: String, message: &str, event_type: &str) -> (Alert, bool) {
        self.alerts.with_all(|alerts| {
            if let Some(existing) = alerts.iter_mut().find(|a| {
                a.rule_id == rule_id && a.fingerprint == fingerprint && a.status != AlertStatus::Resolved
            }) {
                existing.count += 1;
                existing.last_seen = now();
                existing.message = message.to_string();
                return (existing.clone(), false);
            }
            let at = now();
            let alert = Alert {
                id: new_id("alert"),
                rule_id: rule_id.to_string(),
                rule_name: rule_name.to_string(),
                severity: severity.to_string(),
                fingerprint,
                status: AlertStatus::Open,
                message: message.to_string(),
                event_type: event_type.to_string(),
                count: 1,
                first_seen: at,
                last_seen: at,
                updated_by: None,
            };
            alerts.push(alert.clone());
            (alert, true)
        })
    }

    pub fn manual_alert(&self, input: &ManualAlertInput) -> ManagerResult<(Alert, bool)> {
        let message = require("message", &input.message)?;
        let severity = normalize_severity(&input.severity)?;
        let fingerprint = match input.fingerprint.trim() {
            "" => sha256_hex(message.as_bytes())[..16].to_string(),
            f => f.to_string(),
        };
        Ok(self.raise("manual", "manual", &severity, fingerprint, &message, ""))
    }

    pub fn list_alerts(&self, status: Option<&str>, limit: usize) -> Vec<Alert> {
        self.alerts
            .list_filtered(limit, |a| status.is_none_or(|s| a.status.as_str() == s))
    }

    /// `ack` moves open alerts to acknowledged; `resolve` closes open or acknowledged ones.
    pub fn alert_action(&self, id: &str, action: &str, actor: &str) -> ManagerResult<Alert> {
        self.alerts.update(id, "alert", |alert| {
            let next = match (alert.status, action) {
                (AlertStatus::Open, "ack") => AlertStatus::Acknowledged,
                (AlertStatus::Open | AlertStatus::Acknowledged, "resolve") => AlertStatus::Resolved,
                _ => {
                    return Err(ManagerError::denied(
                        "invalid alert transition",
                        json!({ "alert_id": alert.id, "status": alert.status, "action": action }),
                    ))
                }
            };
            alert.status = next;
            alert.last_seen = now();
            let actor = actor.trim();
            if !actor.is_empty() {
                alert.updated_by = Some(actor.to_string());
            }
            Ok(alert.clone())
        })
    }

    pub fn create_webhook(&self, input: WebhookInput) -> ManagerResult<Webhook> {
        let name = require_lower("name", &input.name)?;
        let hook = Webhook {
            id: new_id("webhook"),
            name: name.clone(),
            url: require_url("url", &input.url)?,
            event_prefix: input.event_prefix.trim().to_string(),
            created_at: now(),
        };
        self.webhooks.insert_unique(hook, |w| w.name == name, "webhook")
    }

    pub fn list_webhooks(&self, limit: usize) -> Vec<Webhook> {
        self.webhooks.list(limit)
    }

    pub fn create_target(&self, input: TargetInput) -> ManagerResult<NotificationTarget> {
        let name = require_lower("name", &input.name)?;
        let kind = TargetKind::parse(&require_lower("kind", &input.kind)?)?;
        let address = match kind {
            TargetKind::Email => {
                let address = require("address", &input.address)?;
                if !address.contains('@') {
                    return Err(ManagerError::invalid("address must be an email address"));
                }
                address
            }
            _ => require_url("address", &input.address)?,
        };
        let target = NotificationTarget {
            id: new_id("target"),
            name: name.clone(),
            kind,
            address,
            event_prefix: input.event_prefix.trim().to_string(),
            created_at: now(),
        };
        self.targets
            .insert_unique(target, |t| t.name == name, "notification target")
    }

    pub fn list_targets(&self, limit: usize) -> Vec<NotificationTarget> {
        self.targets.list(limit)
    }

    pub fn list_deliveries(&self, status: Option<&str>, limit: usize) -> Vec<Delivery> {
        self.deliveries
            .list_filtered(limit, |d| status.is_none_or(|s| d.status == s))
    }

    pub fn test_delivery(&self, input: &TestDeliveryInput) -> ManagerResult<Delivery> {
        let target_id = require("target_id", &input.target_id)?;
        let target = self
            .targets
            .get(&target_id)
            .ok_or_else(|| ManagerError::not_found("notification target not found"))?;
        let message = match input.message.trim() {
            "" => "test notification",
            m => m,
        };
        let payload = json!({ "type": "notifications.test", "message": message });
        Ok(self.send_to_target(&target, "notifications.test", &payload))
    }

    fn send_to_target(&self, target: &NotificationTarget, event_type: &str, payload: &Value) -> Delivery {
        let outcome = match target.kind {
            // Mail is handed to the local relay out of band; the record is the contract.
            TargetKind::Email => Ok(250),
            _ => self.deliverer.deliver(&target.address, payload),
        };
        self.record("target", &target.id, &target.name, event_type, outcome)
    }

    fn record(&self, channel: &'static str, id: &str, name: &str, event_type: &str, outcome: Result<u16, String>) -> Delivery {
        record_delivery(&self.deliveries, channel, id, name, event_type, outcome)
    }

    /// Hand a delivery to the outbox, or record it failed when the outbox is full or gone.
    fn enqueue(&self, dispatch: Dispatch) {
        let pending = &self.outbox.pending;
        if pending.fetch_add(1, Ordering::SeqCst) >= OUTBOX_CAPACITY {
            pending.fetch_sub(1, Ordering::SeqCst);
            self.record(
                dispatch.channel,
                &dispatch.destination_id,
                &dispatch.destination,
                &dispatch.event_type,
                Err("delivery queue full".to_string()),
            );
            return;
        }
        if let Err(e) = self.outbox.sender.lock().send(dispatch) {
            let dispatch = e.0;
            pending.fetch_sub(1, Ordering::SeqCst);
            self.record(
                dispatch.channel,
                &dispatch.destination_id,
                &dispatch.destination,
                &dispatch.event_type,
                Err("delivery outbox stopped".to_string()),
            );
        }
    }
}

impl EventSink for NotifyManager {
    fn name(&self) -> &'static str {
        "notify"
    }

    fn on_event(&self, event: &Event) {
        let rules = self.rules.snapshot();
        for rule in rules.iter().filter(|r| r.matches(event)) {
            let discriminator = if rule.field.is_empty() {
                String::new()
            } else {
                event
                    .fields
                    .get(&rule.field)
                    .map(Value::to_string)
                    .unwrap_or_default()
            };
            let fingerprint =
                sha256_hex(format!("{}|{}|{}", rule.id, event.kind, discriminator).as_bytes())[..16]
                    .to_string();
            let (alert, created) =
                self.raise(&rule.id, &rule.name, &rule.severity, fingerprint, &event.message, &event.kind);
            debug!(alert_id = %alert.id, created, count = alert.count, "rule matched event");
        }

        let payload = match serde_json::to_value(event) {
            Ok(v) => Arc::new(v),
            Err(e) => {
                warn!(error = %e, "event encoding failed; skipping deliveries");
                return;
            }
        };
        for hook in self.webhooks.snapshot() {
            if event.matches_prefix(&hook.event_prefix) {
                self.enqueue(Dispatch {
                    channel: "webhook",
                    destination_id: hook.id.clone(),
                    destination: hook.name.clone(),
                    address: hook.url.clone(),
                    event_type: event.kind.clone(),
                    payload: Arc::clone(&payload),
                });
            }
        }
        for target in self.targets.snapshot() {
            if !event.matches_prefix(&target.event_prefix) {
                continue;
            }
            if target.kind == TargetKind::Email {
                self.send_to_target(&target, &event.kind, &payload);
            } else {
                self.enqueue(Dispatch {
                    channel: "target",
                    destination_id: target.id.clone(),
                    destination: target.name.clone(),
                    address: target.address.clone(),
                    event_type: event.kind.clone(),
                    payload: Arc::clone(&payload),
                });
            }
        }
    }
}
