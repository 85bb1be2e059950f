//! Package supply chain: the artifact registry, signing and certification policies,
//! verification, publication checks, maintainer health and cosign-style signatures.

use super::{Deps, Table};
use crate::dispatcher::{HandlerRequest, HandlerResponse};
use crate::error::ApiResult;
use crate::events::Event;
use crate::managers::packages::{
    ArtifactInput, CertificationPolicy, CosignInput, MaintainerHealthInput, PublicationInput,
    SigningPolicy, VerifyInput,
};
use serde::Deserialize;

pub(super) fn register(t: &mut Table) {
    t.get("/v1/packages/artifacts", "list_artifacts", list_artifacts);
    t.post("/v1/packages/artifacts", "register_artifact", register_artifact);
    t.get("/v1/packages/signing-policy", "get_signing_policy", get_signing_policy);
    t.post("/v1/packages/signing-policy", "set_signing_policy", set_signing_policy);
    t.post("/v1/packages/verify", "verify_artifact", verify_artifact);
    t.get("/v1/packages/certification-policy", "get_certification_policy", get_certification_policy);
    t.post("/v1/packages/certification-policy", "set_certification_policy", set_certification_policy);
    t.post("/v1/packages/certify", "certify_artifact", certify_artifact);
    t.post("/v1/packages/publication/check", "publication_check", publication_check);
    t.post("/v1/packages/maintainers/health", "maintainer_health", maintainer_health);
    t.post("/v1/packages/cosign/sign", "cosign_sign", cosign_sign);
    t.post("/v1/packages/cosign/verify", "cosign_verify", cosign_verify);
}

fn list_artifacts(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let name = req.filter_lower("name");
    HandlerResponse::list(&deps.packages.list_artifacts(name.as_deref(), req.limit()))
}

fn register_artifact(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: ArtifactInput = req.json()?;
    let artifact = deps.packages.register_artifact(input)?;
    deps.emit(
        Event::new("packages.artifact.registered", "package artifact registered")
            .field("artifact_id", &artifact.id)
            .field("name", &artifact.name)
            .field("version", &artifact.version)
            .field("checksum", &artifact.checksum),
    );
    HandlerResponse::created(&artifact)
}

fn get_signing_policy(deps: &Deps, _req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::ok(&deps.packages.signing_policy())
}

fn set_signing_policy(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let policy: SigningPolicy = req.json()?;
    let policy = deps.packages.set_signing_policy(policy);
    deps.emit(
        Event::new("packages.signing_policy.updated", "package signing policy updated")
            .field("require_signature", policy.require_signature)
            .field("trusted_signers", &policy.trusted_signers),
    );
    HandlerResponse::ok(&policy)
}

fn verify_artifact(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: VerifyInput = req.json()?;
    HandlerResponse::ok(&deps.packages.verify(&input)?)
}

fn get_certification_policy(deps: &Deps, _req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    HandlerResponse::ok(&deps.packages.certification_policy())
}

fn set_certification_policy(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let policy: CertificationPolicy = req.json()?;
    let policy = deps.packages.set_certification_policy(policy);
    deps.emit(
        Event::new("packages.certification_policy.updated", "package certification policy updated")
            .field("min_maintainers", policy.min_maintainers)
            .field("allowed_licenses", &policy.allowed_licenses),
    );
    HandlerResponse::ok(&policy)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CertifyInput {
    artifact_id: String,
}

fn certify_artifact(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: CertifyInput = req.json()?;
    let result = deps.packages.certify(&input.artifact_id)?;
    deps.emit(
        Event::new("packages.artifact.certified", "package artifact certified")
            .field("artifact_id", input.artifact_id.trim()),
    );
    HandlerResponse::ok(&result)
}

fn publication_check(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: PublicationInput = req.json()?;
    HandlerResponse::ok(&deps.packages.publication_check(&input)?)
}

fn maintainer_health(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: MaintainerHealthInput = req.json()?;
    HandlerResponse::ok(&deps.packages.maintainer_health(&input)?)
}

fn cosign_sign(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: CosignInput = req.json()?;
    let signature = deps.packages.cosign_sign(&deps.signer, &input)?;
    deps.emit(
        Event::new("packages.cosign.signed", "artifact digest signed")
            .field("signature_id", &signature.id)
            .field("subject", &signature.subject)
            .field("digest", &signature.digest)
            .field("key_id", &signature.key_id),
    );
    HandlerResponse::created(&signature)
}

fn cosign_verify(deps: &Deps, req: &HandlerRequest) -> ApiResult<HandlerResponse> {
    let input: CosignInput = req.json()?;
    HandlerResponse::ok(&deps.packages.cosign_verify(&deps.signer, &input)?)
}
