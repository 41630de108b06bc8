//! Settlement and payment-history endpoints.

use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::payments::types::{atomic_to_usd, USDC_DECIMALS};
use crate::AppState;

#[derive(Debug, Deserialize)]
struct SettleRequest {
    user_id: String,
    transaction_id: String,
    /// Expected amount in atomic units
    expected_amount: u64,
    /// Defaults to the USD value of expected_amount (stablecoin assumption)
    #[serde(default)]
    usd_amount: Option<f64>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    recipient: Option<String>,
}

/// POST /api/payments/settle — verify a payment and credit the user.
///
/// Always answers 200 with a SettlementResult body when the request itself
/// was well-formed; a failed verification is a result, not an HTTP error.
async fn settle_payment(
    state: web::Data<AppState>,
    body: web::Json<SettleRequest>,
) -> HttpResponse {
    let r = body.into_inner();

    if r.user_id.is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "user_id is required"
        }));
    }

    let token = r.token.unwrap_or_else(|| state.config.usdc_mint.clone());
    let recipient = match r
        .recipient
        .or_else(|| state.config.payment_wallet_address.clone())
    {
        Some(w) => w,
        None => {
            return HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "error": "payments not configured"
            }));
        }
    };
    let usd_amount = r
        .usd_amount
        .unwrap_or_else(|| atomic_to_usd(r.expected_amount, USDC_DECIMALS));

    let result = state
        .settlement
        .settle(
            &r.user_id,
            &r.transaction_id,
            r.expected_amount,
            usd_amount,
            &token,
            &recipient,
        )
        .await;

    HttpResponse::Ok().json(result)
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// GET /api/payments/{user_id} — recent payment attempts, newest first.
async fn payment_history(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<HistoryQuery>,
) -> HttpResponse {
    let user_id = path.into_inner();

    match state.db.get_recent_payments_by_user(&user_id, query.limit) {
        Ok(records) => HttpResponse::Ok().json(serde_json::json!({
            "user_id": user_id,
            "payments": records,
        })),
        Err(e) => {
            log::error!("[payments] History lookup failed for {}: {}", user_id, e);
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("Database error: {}", e)
            }))
        }
    }
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/payments")
            .route("/settle", web::post().to(settle_payment))
            .route("/{user_id}", web::get().to(payment_history)),
    );
}
