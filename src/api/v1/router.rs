use super::error::*;
use super::handler;
use crate::application_impl::AuthGuard;
use crate::domain_model::*;
use crate::server::Gateway;
use std::convert::Infallible;
use std::sync::Arc;
use warp::{Filter, reject};

/// The v1 surface under `/api/v1`, with rejections rendered as JSON errors.
pub fn mounted(
    gateway: Arc<Gateway>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = Infallible> + Clone {
    warp::path("api")
        .and(warp::path("v1"))
        .and(routes(gateway))
        .recover(recover_error)
}

pub fn routes(
    gateway: Arc<Gateway>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let health = warp::get()
        .and(warp::path("health"))
        .and(warp::path::end())
        .and(with(gateway.clone()))
        .and_then(handler::health);

    let login = warp::post()
        .and(warp::path!("auth" / "login"))
        .and(warp::body::json())
        .and(with(gateway.dispatcher.clone()))
        .and_then(handler::login);

    let register = warp::post()
        .and(warp::path!("auth" / "register"))
        .and(warp::body::json())
        .and(with(gateway.dispatcher.clone()))
        .and_then(handler::register);

    let refresh = warp::post()
        .and(warp::path!("auth" / "refresh"))
        .and(warp::cookie::optional::<String>(REFRESH_COOKIE_NAME))
        .and(with(gateway.dispatcher.clone()))
        .and_then(handler::refresh);

    let revoke = warp::post()
        .and(warp::path!("auth" / "revoke"))
        .and(warp::cookie::optional::<String>(REFRESH_COOKIE_NAME))
        .and(with(gateway.dispatcher.clone()))
        .and_then(handler::revoke);

    let rpc = warp::post()
        .and(warp::path("rpc"))
        .and(warp::path::end())
        .and(with_guard(gateway.guard.clone()))
        .and(warp::body::json())
        .and(with(gateway.dispatcher.clone()))
        .and_then(handler::rpc);

    health
        .or(login)
        .or(register)
        .or(refresh)
        .or(revoke)
        .or(rpc)
}

fn with<ServiceType>(
    service: Arc<ServiceType>,
) -> impl Filter<Extract = (Arc<ServiceType>,), Error = Infallible> + Clone
where
    ServiceType: Send + Sync + ?Sized,
{
    warp::any().map(move || service.clone())
}

fn with_guard(
    guard: Arc<AuthGuard>,
) -> impl Filter<Extract = (AuthUser,), Error = warp::Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(move |header: Option<String>| {
        let guard = guard.clone();
        async move {
            guard
                .authorize(header.as_deref())
                .await
                .map_err(ApiErrorCode::from)
                .map_err(reject::custom)
        }
    })
}
