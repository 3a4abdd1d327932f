use crate::application_impl::*;
use crate::application_port::*;
use crate::domain_model::*;
use crate::logger::*;
use crate::server::Gateway;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use warp::Reply;
use warp::http::header::SET_COOKIE;
use warp::reply::Response;

pub async fn health(gateway: Arc<Gateway>) -> Result<impl warp::Reply, warp::Rejection> {
    Ok(warp::reply::json(&json!({
        "status": "ok",
        "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        "pendingRequests": gateway.pending_requests(),
    })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<Value>,
    access_token: Value,
}

/// Lift the refresh token out of a successful auth reply into a `Set-Cookie` header.
/// Failed replies go back to the client as they are.
fn session_reply(reply: ReplyEnvelope, with_user: bool) -> Response {
    if !reply.success {
        return warp::reply::json(&reply).into_response();
    }

    let data = reply.data.unwrap_or(Value::Null);
    let field = |name: &str| data.get(name).cloned().unwrap_or(Value::Null);

    let cookie = match serde_json::from_value::<RefreshTokenInfo>(field("refreshTokenInfo")) {
        Ok(info) => Some(info),
        Err(e) => {
            warn!(error = %e, "auth reply without refresh cookie");
            None
        }
    };
    let body = SessionResponse {
        success: true,
        message: reply.message,
        user: with_user.then(|| field("user")),
        access_token: field("accessToken"),
    };

    let json = warp::reply::json(&body);
    match cookie {
        Some(info) => warp::reply::with_header(json, SET_COOKIE, info.to_set_cookie()).into_response(),
        None => json.into_response(),
    }
}

pub async fn login(
    body: Value,
    dispatcher: Arc<RpcDispatcher>,
) -> Result<Response, warp::Rejection> {
    let reply = dispatcher.dispatch(AUTH_LOGIN, body).await;
    Ok(session_reply(reply, true))
}

pub async fn register(
    body: Value,
    dispatcher: Arc<RpcDispatcher>,
) -> Result<Response, warp::Rejection> {
    let reply = dispatcher.dispatch(AUTH_REGISTER, body).await;
    Ok(session_reply(reply, true))
}

pub async fn refresh(
    refresh_token: Option<String>,
    dispatcher: Arc<RpcDispatcher>,
) -> Result<Response, warp::Rejection> {
    let Some(refresh_token) = refresh_token else {
        let reply = ReplyEnvelope::err(AuthError::InvalidOrExpiredRefreshToken.to_string());
        return Ok(warp::reply::json(&reply).into_response());
    };

    let reply = dispatcher
        .dispatch(AUTH_REFRESH, json!({ "refreshToken": refresh_token }))
        .await;
    Ok(session_reply(reply, false))
}

pub async fn revoke(
    refresh_token: Option<String>,
    dispatcher: Arc<RpcDispatcher>,
) -> Result<Response, warp::Rejection> {
    // nothing to revoke, so nothing is reported as revoked
    let Some(refresh_token) = refresh_token else {
        let reply = ReplyEnvelope::err(AuthError::InvalidOrExpiredRefreshToken.to_string());
        return Ok(warp::reply::json(&reply).into_response());
    };

    let reply = dispatcher
        .dispatch(AUTH_REVOKE, json!({ "refreshToken": refresh_token }))
        .await;
    Ok(warp::reply::with_header(
        warp::reply::json(&reply),
        SET_COOKIE,
        cleared_refresh_cookie(),
    )
    .into_response())
}

pub async fn rpc(
    user: AuthUser,
    call: OperationCall,
    dispatcher: Arc<RpcDispatcher>,
) -> Result<impl warp::Reply, warp::Rejection> {
    debug!(user_id = %user.id, operation = %call.operation, "rpc");
    let reply = dispatcher.dispatch(&call.operation, call.payload).await;
    Ok(warp::reply::json(&reply))
}
