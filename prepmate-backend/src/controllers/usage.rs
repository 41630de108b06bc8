//! Usage metering endpoints.
//!
//! `POST /api/usage/check` is the gate in front of credit-costed actions:
//! it answers 200 when the action is affordable and 402 with an x402
//! challenge body when it is not. A retried request carries the payment in
//! an `X-PAYMENT` header, which is settled before the check.

use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use crate::payments::types::UsageCheckResult;
use crate::payments::PaymentProof;
use crate::AppState;

#[derive(Debug, Deserialize)]
struct UsageRequest {
    #[serde(default)]
    user_id: Option<String>,
    action: String,
    #[serde(default = "default_cost")]
    cost: i64,
}

fn default_cost() -> i64 {
    1
}

/// Pull and decode the X-PAYMENT header, if present.
fn payment_proof(req: &HttpRequest) -> Result<Option<PaymentProof>, String> {
    let header = match req.headers().get("X-PAYMENT") {
        Some(h) => h.to_str().map_err(|_| "Invalid X-PAYMENT header".to_string())?,
        None => return Ok(None),
    };
    PaymentProof::from_header(header).map(Some)
}

/// Render a gate verdict as an HTTP response: 200 when allowed, 402 with
/// the challenge body otherwise.
fn respond(result: UsageCheckResult) -> HttpResponse {
    if result.allowed {
        return HttpResponse::Ok().json(result);
    }

    match &result.payment_required {
        Some(challenge) => {
            let mut body = serde_json::to_value(challenge).unwrap_or_default();
            if let Some(ref e) = result.settlement_error {
                body["error"] = serde_json::json!(e);
            }
            HttpResponse::PaymentRequired().json(body)
        }
        None => HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "error": result
                .settlement_error
                .unwrap_or_else(|| "payments not configured".to_string()),
        })),
    }
}

/// POST /api/usage/check — is this action affordable for this user?
async fn check_usage(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<UsageRequest>,
) -> HttpResponse {
    let proof = match payment_proof(&req) {
        Ok(p) => p,
        Err(e) => {
            return HttpResponse::BadRequest().json(serde_json::json!({ "error": e }));
        }
    };

    let result = state
        .gate
        .check_usage(body.user_id.as_deref(), &body.action, body.cost, proof.as_ref())
        .await;
    respond(result)
}

/// POST /api/usage/consume — deduct the cost of an action that is about to
/// run. Insufficient balances get the same 402 challenge as a check.
async fn consume_usage(
    state: web::Data<AppState>,
    body: web::Json<UsageRequest>,
) -> HttpResponse {
    let user_id = match body.user_id.as_deref() {
        Some(id) if !id.is_empty() => id,
        // Anonymous usage is not metered, so there is nothing to consume.
        _ => {
            return HttpResponse::Ok().json(serde_json::json!({
                "deducted": 0,
                "balance": serde_json::Value::Null,
            }));
        }
    };

    match state.db.deduct_credits(user_id, body.cost) {
        Ok(Some(balance)) => HttpResponse::Ok().json(serde_json::json!({
            "deducted": body.cost,
            "balance": balance,
        })),
        Ok(None) => {
            let result = state
                .gate
                .check_usage(Some(user_id), &body.action, body.cost, None)
                .await;
            respond(result)
        }
        Err(e) => {
            log::error!("[usage] Deduction failed for {}: {}", user_id, e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("Database error: {}", e)
            }))
        }
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/usage")
            .route("/check", web::post().to(check_usage))
            .route("/consume", web::post().to(consume_usage)),
    );
}
