//! Secret integrations, the encrypted secret store and runtime secret sessions.
//!
//! Plaintext leaves the process only in the `resolve` response; audit events carry
//! identifiers and versions, never values or lease tokens.

use super::{Deps, Table};
use crate::dispatcher::{HandlerRequest, HandlerResponse};
use crate::error::ApiResult;
use crate::events::Event;
use crate::managers::secrets::{IntegrationInput, SecretPutInput, SecretRef, SessionInput};

pub(super) fn register(t: &mut Table) {
    t.get("/v1/secrets/integrations", "list_secret_integrations", list_integrations);
    t.post("/v1/secrets/integrations", "create_secret_integration", create_integration);
    t.get("/v1/secrets/store", "list_secrets", list_secrets);
    t.post("/v1/secrets/store", "put_secret", put_secret);
    t.post("/v1/secrets/resolve", "resolve_secret", resolve_secret);
    t.post("/v1/secrets/rotate", "rotate_secret", rotate_secret);
    t.post("/v1/secrets/destroy", "destroy_secret", destroy_secret);
    t.get("/v1/secrets/sessions", "list_secret_sessions", list_sessions);
    t.post("/v1/secrets/sessions", "create_secret_session", create_session);
    t.post(
        "/v1/secrets/sessions/{id}/{session:renew|revoke}",
        "secret_session_action",
        session_action,
    );
}

fn list_integrations(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.secrets.list_integrations(req.limit()))
}

fn create_integration(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: IntegrationInput = req.json()?;
    let integration = deps.secrets.create_integration(input)?;
    deps.emit(
        Event::new("secrets.integration.created", "secret integration created")
            .field("integration_id", &integration.id)
            .field("name", &integration.name)
            .field("provider", &integration.provider),
    );
    HandlerResponse::created(&integration)
}

fn list_secrets(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.secrets.list(req.limit()))
}

fn put_secret(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: SecretPutInput = req.json()?;
    let secret = deps.secrets.put(input)?;
    deps.emit(
        Event::new("secrets.secret.stored", "secret stored")
            .field("secret_id", &secret.id)
            .field("name", &secret.name)
            .field("version", secret.version)
            .field("key_id", &secret.key_id),
    );
    HandlerResponse::created(&secret)
}

fn resolve_secret(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let reference: SecretRef = req.json()?;
    let resolved = deps.secrets.resolve(&reference)?;
    deps.emit(
        Event::new("secrets.secret.resolved", "secret resolved")
            .field("secret_id", &resolved.id)
            .field("name", &resolved.name)
            .field("version", resolved.version),
    );
    HandlerResponse::ok(&resolved)
}

fn rotate_secret(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let reference: SecretRef = req.json()?;
    let secret = deps.secrets.rotate(&reference)?;
    deps.emit(
        Event::new("secrets.secret.rotated", "secret rotated")
            .field("secret_id", &secret.id)
            .field("name", &secret.name)
            .field("version", secret.version),
    );
    HandlerResponse::ok(&secret)
}

fn destroy_secret(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let reference: SecretRef = req.json()?;
    let secret = deps.secrets.destroy(&reference)?;
    deps.emit(
        Event::new("secrets.secret.destroyed", "secret destroyed")
            .field("secret_id", &secret.id)
            .field("name", &secret.name),
    );
    HandlerResponse::ok(&secret)
}

fn list_sessions(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.secrets.list_sessions(req.limit()))
}

/// The lease token is returned unmasked once, here.
fn create_session(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: SessionInput = req.json()?;
    let session = deps.secrets.create_session(&deps.base_dir, input)?;
    deps.emit(
        Event::new("secrets.session.created", "runtime secret session opened")
            .field("session_id", &session.id)
            .field("subject", &session.subject)
            .field("secrets", &session.secrets)
            .field("expires_at", session.expires_at),
    );
    HandlerResponse::created(&session)
}

fn session_action(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let id = req.path_id("id")?;
    let session = deps.secrets.session_action(&id, req.action())?;
    let kind = match req.action() {
        "renew" => "secrets.session.renewed",
        _ => "secrets.session.revoked",
    };
    deps.emit(
        Event::new(kind, "runtime secret session updated")
            .field("session_id", &session.id)
            .field("status", session.status)
            .field("expires_at", session.expires_at),
    );
    HandlerResponse::ok(&session)
}
