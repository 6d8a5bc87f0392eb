use axum::response::Json;
use axum::Extension;
use newsloom_core::UserContext;
use serde_json::{json, Value};

use crate::middlewares::session::OptionalUserContext;

/// `GET /api/user/profile`: the authenticated caller's own context.
pub async fn get_profile(Extension(context): Extension<UserContext>) -> Json<UserContext> {
  Json(context)
}

/// `POST /api/user/profile`: mutating, so it sits behind the CSRF check.
pub async fn update_profile(Extension(context): Extension<UserContext>) -> Json<Value> {
  Json(json!({ "status": "ok", "user_id": context.user_id }))
}

/// `GET /api/feeds/public`: optional-auth read endpoint. Anonymous
/// callers (including degraded-auth ones) get the public view.
pub async fn public_feeds(
  Extension(OptionalUserContext(context)): Extension<OptionalUserContext>,
) -> Json<Value> {
  Json(json!({
    "personalized": context.is_some(),
    "user_id": context.map(|c| c.user_id),
  }))
}
