//! Replay-safe command ingestion and the dead-letter list.

use super::{Deps, Table};
use crate::dispatcher::{HandlerRequest, HandlerResponse};
use crate::error::{ApiError, ApiResult};
use crate::events::Event;
use crate::managers::commands::{CommandInput, Ingested};
use serde_json::json;

pub(super) fn register(t: &mut Table) {
    t.post("/v1/commands/ingest", "ingest_command", ingest_command);
    t.get("/v1/commands/dead-letters", "list_dead_letters", list_dead_letters);
}

/// 202 on a matching checksum (replays included, event only on first sight);
/// 422 with the dead-letter record on mismatch.
fn ingest_command(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: CommandInput = req.json()?;
    let outcome = deps.commands.ingest(
        &deps.base_dir,
        &deps.control,
        &deps.queue,
        &input,
        req.force_apply(),
    )?;
    match outcome {
        Ingested::DeadLettered(letter) => Err(ApiError::Unprocessable(json!({
            "error": "checksum mismatch",
            "dead_letter": letter,
        }))),
        Ingested::Enqueued(job, created) => {
            if created {
                deps.emit(
                    Event::new("commands.ingested", "command ingested")
                        .field("job_id", &job.id)
                        .field("source", &job.source)
                        .field("idempotency_key", &job.idempotency_key),
                );
            }
            HandlerResponse::accepted(&job)
        }
    }
}

fn list_dead_letters(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::list(&deps.commands.dead_letters(req.limit()))
}
