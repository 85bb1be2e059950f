//! Event stream: external ingest, webhook subscriptions, notification targets and
//! deliveries, alert rules and the alerts inbox.

use super::{Deps, Table};
use crate::dispatcher::{HandlerRequest, HandlerResponse};
use crate::error::ApiResult;
use crate::events::Event;
use crate::logging::{mask_sensitive, REDACTED_VALUE};
use crate::managers::notify::{ManualAlertInput, RuleInput, TargetInput, TestDeliveryInput, WebhookInput};
use serde::Deserialize;
use serde_json::{json, Map, Value};

pub(super) fn register(t: &mut Table) {
    t.get("/v1/events", "list_events", list_events);
    t.get("/v1/events/ingest", "list_ingested_events", list_events);
    t.post("/v1/events/ingest", "ingest_event", ingest_event);
    t.get("/v1/webhooks", "list_webhooks", list_webhooks);
    t.post("/v1/webhooks", "create_webhook", create_webhook);
    t.get("/v1/notifications/targets", "list_notification_targets", list_targets);
    t.post("/v1/notifications/targets", "create_notification_target", create_target);
    t.get("/v1/notifications/deliveries", "list_deliveries", list_deliveries);
    t.post("/v1/notifications/deliveries", "test_delivery", test_delivery);
    t.get("/v1/rules", "list_rules", list_rules);
    t.post("/v1/rules", "create_rule", create_rule);
    t.get("/v1/alerts/inbox", "list_alerts", list_alerts);
    t.post("/v1/alerts/inbox", "create_alert", create_alert);
    t.post("/v1/alerts/inbox/{id}/{alert:ack|resolve}", "alert_action", alert_action);
}

fn list_events(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let prefix = req.filter("type");
    HandlerResponse::list(&deps.events.recent(prefix.as_deref(), req.limit()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct IngestInput {
    #[serde(rename = "type")]
    kind: String,
    message: String,
    fields: Map<String, Value>,
}

/// The ingested event is itself the audit event; credential-like fields are masked.
fn ingest_event(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: IngestInput = req.json()?;
    let kind = crate::codec::required("type", &input.kind)?;
    let message = match input.message.trim() {
        "" => "external event",
        m => m,
    };
    let mut fields = Value::Object(input.fields);
    mask_sensitive(&mut fields, REDACTED_VALUE);

    let mut event = Event::new(&kind, message);
    if let Value::Object(map) = fields {
        for (key, value) in map {
            event.fields.insert(&key, value);
        }
    }
    let retained = event.clone();
    deps.emit(event);
    HandlerResponse::accepted(&json!({ "accepted": true, "event": retained }))
}

fn list_webhooks(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.notify.list_webhooks(req.limit()))
}

fn create_webhook(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: WebhookInput = req.json()?;
    let hook = deps.notify.create_webhook(input)?;
    deps.emit(
        Event::new("webhooks.created", "webhook subscription created")
            .field("webhook_id", &hook.id)
            .field("name", &hook.name)
            .field("event_prefix", &hook.event_prefix),
    );
    HandlerResponse::created(&hook)
}

fn list_targets(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.notify.list_targets(req.limit()))
}

fn create_target(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: TargetInput = req.json()?;
    let target = deps.notify.create_target(input)?;
    deps.emit(
        Event::new("notifications.target.created", "notification target created")
            .field("target_id", &target.id)
            .field("name", &target.name)
            .field("kind", target.kind),
    );
    HandlerResponse::created(&target)
}

fn list_deliveries(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let status = req.filter_lower("status");
    HandlerResponse::list(&deps.notify.list_deliveries(status.as_deref(), req.limit()))
}

fn test_delivery(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: TestDeliveryInput = req.json()?;
    let delivery = deps.notify.test_delivery(&input)?;
    deps.emit(
        Event::new("notifications.delivery.tested", "test delivery attempted")
            .field("delivery_id", &delivery.id)
            .field("target_id", &delivery.destination_id)
            .field("status", delivery.status),
    );
    HandlerResponse::accepted(&delivery)
}

fn list_rules(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.notify.list_rules(req.limit()))
}

fn create_rule(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: RuleInput = req.json()?;
    let rule = deps.notify.create_rule(input)?;
    deps.emit(
        Event::new("rules.created", "alert rule created")
            .field("rule_id", &rule.id)
            .field("name", &rule.name)
            .field("event_prefix", &rule.event_prefix)
            .field("severity", &rule.severity),
    );
    HandlerResponse::created(&rule)
}

fn list_alerts(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let status = req.filter_lower("status");
    HandlerResponse::list(&deps.notify.list_alerts(status.as_deref(), req.limit()))
}

/// 201 for a new alert; 200 when the fingerprint folded into an open one.
fn create_alert(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ManualAlertInput = req.json()?;
    let (alert, created) = deps.notify.manual_alert(&input)?;
    deps.emit(
        Event::new("alerts.raised", "manual alert raised")
            .field("alert_id", &alert.id)
            .field("severity", &alert.severity)
            .field("fingerprint", &alert.fingerprint)
            .field("count", alert.count),
    );
    if created {
        HandlerResponse::created(&alert)
    } else {
        HandlerResponse::ok(&alert)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ActorInput {
    actor: String,
}

fn alert_action(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let id = req.path_id("id")?;
    let input: ActorInput = req.json_or_default()?;
    let alert = deps.notify.alert_action(&id, req.action(), &input.actor)?;
    let kind = match req.action() {
        "ack" => "alerts.acknowledged",
        _ => "alerts.resolved",
    };
    deps.emit(
        Event::new(kind, "alert updated")
            .field("alert_id", &alert.id)
            .field("status", alert.status.as_str())
            .field("actor", input.actor.trim()),
    );
    HandlerResponse::ok(&alert)
}
