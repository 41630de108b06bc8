//! Credit balance endpoint.

use actix_web::{web, HttpResponse};

use crate::AppState;

/// GET /api/credits/{user_id} — balance plus in-flight payment count.
async fn get_balance(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let user_id = path.into_inner();

    let balance = match state.db.get_credit_balance(&user_id) {
        Ok(b) => b,
        Err(e) => {
            log::error!("[credits] Balance lookup failed for {}: {}", user_id, e);
            return HttpResponse::InternalServerError().json(serde_json::json!({
                "error": format!("Database error: {}", e)
            }));
        }
    };

    let pending = state
        .db
        .count_pending_payments_by_user(&user_id)
        .unwrap_or(0);

    HttpResponse::Ok().json(serde_json::json!({
        "user_id": user_id,
        "balance": balance,
        "pending_payments": pending,
    }))
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/credits/{user_id}").route(web::get().to(get_balance)));
}
