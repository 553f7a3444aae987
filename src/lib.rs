mod auth;
mod config;
mod database;
mod db;
mod error;
mod middleware;
mod models;
mod realtime;
mod routes;
mod service;

#[cfg(test)]
pub mod test_utils;

pub use config::Config;

use crate::db::stage_store;
use crate::middleware::RequestLogger;
use crate::middleware::rate_limit::RateLimiter;
use crate::routes as app_routes;
use crate::service::email::EmailService;
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket, http::Method};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_okapi::swagger_ui::{SwaggerUIConfig, make_swagger_ui};
use rocket_okapi::settings::OpenApiSettings;
use rocket_okapi::{get_openapi_route, okapi::merge::marge_spec_list};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing(log_level: &str, json_format: bool) {
    // RUST_LOG overrides the configured level, e.g.
    //   RUST_LOG=collabhub::realtime=debug
    //   RUST_LOG=info,collabhub::routes=trace
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_line_number(true);

    // A global subscriber may already be installed (tests build many rockets).
    let _ = if json_format { subscriber.json().try_init() } else { subscriber.try_init() };
}

/// Private cookies need a stable key outside the debug profile.
fn ensure_rocket_secret_key() {
    let profile = std::env::var("ROCKET_PROFILE").unwrap_or_else(|_| "debug".to_string());
    if profile != "debug" && std::env::var_os("ROCKET_SECRET_KEY").is_none() {
        panic!("ROCKET_SECRET_KEY must be set for the '{}' profile (openssl rand -base64 32)", profile);
    }
}

fn build_cors(cors_config: &config::CorsConfig) -> CorsOptions {
    let origins: Vec<&str> = cors_config.allowed_origins.iter().map(String::as_str).collect();
    let allowed_origins = match origins.as_slice() {
        ["*"] => {
            // Browsers refuse credentialed responses with a wildcard origin.
            assert!(!cors_config.allow_credentials, "cors.allowed_origins = [\"*\"] cannot be combined with cors.allow_credentials");
            AllowedOrigins::all()
        }
        exact => AllowedOrigins::some_exact(exact),
    };

    let allowed_methods = [Method::Get, Method::Post, Method::Put, Method::Delete, Method::Patch, Method::Options, Method::Head]
        .into_iter()
        .map(From::from)
        .collect();

    CorsOptions {
        allowed_origins,
        allowed_methods,
        allowed_headers: rocket_cors::AllowedHeaders::some(&["Content-Type", "Authorization", "Accept", middleware::REQUEST_ID_HEADER]),
        allow_credentials: cors_config.allow_credentials,
        ..Default::default()
    }
}

/// `"api/v2/"` becomes `"/api/v2"`; blank falls back to the default prefix.
fn normalize_base_path(raw: &str) -> String {
    match raw.trim().trim_matches('/') {
        "" if raw.trim().is_empty() => config::DEFAULT_API_BASE_PATH.to_string(),
        "" => "/".to_string(),
        inner => format!("/{}", inner),
    }
}

fn join_base_path(base_path: &str, path: &str) -> String {
    format!("{}/{}", base_path.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Primary base path first, then the additional ones, without duplicates.
fn collect_base_paths(api_config: &config::ApiConfig) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for path in std::iter::once(&api_config.base_path).chain(&api_config.additional_base_paths).map(|p| normalize_base_path(p)) {
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

struct RouteSpec {
    path: &'static str,
    routes: Vec<rocket::Route>,
    openapi: rocket_okapi::okapi::openapi3::OpenApi,
}

macro_rules! route_spec {
    ($path:literal, $module:ident) => {{
        let (routes, openapi) = app_routes::$module::routes();
        RouteSpec { path: $path, routes, openapi }
    }};
}

fn collect_route_specs(enable_seed: bool) -> Vec<RouteSpec> {
    let mut specs = vec![
        route_spec!("/auth", auth),
        route_spec!("/password-reset", password_reset),
        route_spec!("/two-factor", two_factor),
        route_spec!("/sessions", session),
        route_spec!("/users", user),
        route_spec!("/workspaces", workspace),
        route_spec!("/channels", channel),
        route_spec!("/messages", message),
        route_spec!("/direct", direct),
        route_spec!("/documents", document),
        route_spec!("/friends", friendship),
        route_spec!("/notifications", notification),
        route_spec!("/health", health),
    ];

    if enable_seed {
        specs.push(route_spec!("/seed", seed));
    }

    specs
}

fn mount_api_routes(mut rocket: Rocket<Build>, base_path: &str, api_config: &config::ApiConfig) -> Rocket<Build> {
    // The websocket upgrade has no OpenAPI description.
    rocket = rocket.mount(base_path, app_routes::realtime::routes());

    let mut documented = Vec::new();
    for spec in collect_route_specs(api_config.enable_seed) {
        rocket = rocket.mount(join_base_path(base_path, spec.path), spec.routes);
        documented.push((spec.path, spec.openapi));
    }
    if !api_config.enable_swagger {
        return rocket;
    }

    let openapi = marge_spec_list(&documented).unwrap_or_else(|err| panic!("OpenAPI documents of the route modules do not merge: {}", err));
    let openapi_url = join_base_path(base_path, "openapi.json");
    rocket
        .mount(base_path, vec![get_openapi_route(openapi, &OpenApiSettings::default())])
        .mount(
            join_base_path(base_path, "docs"),
            make_swagger_ui(&SwaggerUIConfig {
                url: openapi_url,
                ..Default::default()
            }),
        )
}

fn stage_rate_limiter(rate_limit_config: config::RateLimitConfig) -> AdHoc {
    AdHoc::on_ignite("Rate Limiter", move |rocket| {
        let limiter = Arc::new(RateLimiter::new(rate_limit_config.clone()));
        limiter.clone().spawn_cleanup_task();

        Box::pin(async move { rocket.manage(limiter) })
    })
}

pub fn build_rocket(config: Config) -> Rocket<Build> {
    init_tracing(&config.logging.level, config.logging.json_format);
    ensure_rocket_secret_key();

    let cors = build_cors(&config.cors).to_cors().expect("Failed to create CORS fairing");

    let base_paths = collect_base_paths(&config.api);
    let (email_service, outbox) = EmailService::from_config(&config);

    let mut rocket = rocket::build()
        .attach(stage_rate_limiter(config.rate_limit.clone()))
        .attach(cors)
        .attach(RequestLogger)
        .attach(stage_store(config.store.clone(), config.realtime.clone()))
        .manage(email_service);

    if let Some(outbox) = outbox {
        rocket = rocket.manage(outbox);
    }

    for base_path in &base_paths {
        rocket = mount_api_routes(rocket, base_path, &config.api);
        rocket = rocket.register(base_path.as_str(), app_routes::error::catchers());
    }

    rocket.manage(config)
}
