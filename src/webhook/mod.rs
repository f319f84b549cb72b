//! Mutating admission webhook
//!
//! Stamps a mutation timestamp annotation on every policy create/update.
//! Spec changes bump `metadata.generation` in the store, but the handlers
//! also need a change marker that survives metadata-only rewrites; the
//! webhook provides it. Runs replicated behind leader election in the store
//! and tolerates overlap (stamping twice is harmless).

use std::net::SocketAddr;

use axum::{routing::post, Json, Router};
use chrono::Utc;
use json_patch::{AddOperation, PatchOperation};
use jsonptr::PointerBuf;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use tracing::{debug, error, info};

use crate::crd::WEBHOOK_MUTATION_TIMESTAMP_ANNOTATION;
use crate::environment::WebhookEnvironment;
use crate::{Error, Result};

/// Create the webhook router with the policy mutation endpoint
pub fn webhook_router() -> Router {
    Router::new().route("/nodenetworkconfigurationpolicies-mutate", post(mutate_handler))
}

/// Handle a mutating admission review for a policy
pub async fn mutate_handler(
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    let response = mutate_policy(&req);
    Json(response.into_review())
}

fn mutate_policy(request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let Some(obj) = &request.object else {
        debug!(uid = %request.uid, "no object in request, allowing unchanged");
        return AdmissionResponse::from(request);
    };

    let stamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let ops = mutation_patch(obj, stamp);

    debug!(
        uid = %request.uid,
        policy = ?obj.metadata.name,
        stamp,
        "stamping policy mutation timestamp"
    );

    match AdmissionResponse::from(request).with_patch(json_patch::Patch(ops)) {
        Ok(response) => response,
        Err(e) => {
            error!(uid = %request.uid, error = %e, "failed to serialize patch");
            AdmissionResponse::from(request).deny(format!("patch serialization error: {e}"))
        }
    }
}

/// Build the JSON patch stamping the mutation timestamp annotation
fn mutation_patch(obj: &DynamicObject, stamp: i64) -> Vec<PatchOperation> {
    let mut ops = Vec::new();

    if obj.metadata.annotations.is_none() {
        ops.push(PatchOperation::Add(AddOperation {
            path: PointerBuf::from_tokens(["metadata", "annotations"]),
            value: serde_json::json!({}),
        }));
    }

    ops.push(PatchOperation::Add(AddOperation {
        path: PointerBuf::from_tokens([
            "metadata",
            "annotations",
            WEBHOOK_MUTATION_TIMESTAMP_ANNOTATION,
        ]),
        value: serde_json::Value::String(stamp.to_string()),
    }));

    ops
}

/// Serve the webhook over TLS until shutdown
pub async fn serve(addr: SocketAddr, env: &WebhookEnvironment) -> Result<()> {
    let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
        &env.cert_path,
        &env.key_path,
    )
    .await
    .map_err(|e| Error::environment(format!("failed to load webhook TLS material: {e}")))?;

    info!(%addr, "webhook server listening");
    axum_server::bind_rustls(addr, tls_config)
        .serve(webhook_router().into_make_service())
        .await
        .map_err(|e| Error::environment(format!("webhook server error: {e}")))?;
    Ok(())
}
