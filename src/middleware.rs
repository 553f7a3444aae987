pub mod rate_limit;

use rocket::fairing::{Fairing, Info, Kind};
use rocket::http::Header;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::{Data, Response};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Longest user agent kept in session records and the activity log.
const MAX_USER_AGENT_LEN: usize = 256;

const SECURITY_HEADERS: [(&str, &str); 3] = [("X-Content-Type-Options", "nosniff"), ("X-Frame-Options", "DENY"), ("Cache-Control", "no-store")];

/// Correlates the log lines of one request. A well-formed `X-Request-Id` sent by a
/// proxy is reused, anything else gets a fresh id.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new() -> Self {
        RequestId(Uuid::new_v4().to_string())
    }

    fn from_header(value: Option<&str>) -> Self {
        value
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .map(|id| RequestId(id.to_string()))
            .unwrap_or_default()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

/// Stored in the request-local cache by [`RequestLogger`].
#[derive(Clone)]
struct RequestTrace {
    id: RequestId,
    started: Instant,
}

fn trace_of(request: &Request<'_>) -> Option<RequestTrace> {
    request.local_cache(|| None::<RequestTrace>).clone()
}

/// Id assigned to the request, or `"unknown"` outside the logging fairing.
pub fn request_id_of(request: &Request<'_>) -> String {
    trace_of(request).map(|t| t.id.0).unwrap_or_else(|| "unknown".to_string())
}

/// Tags every request with a [`RequestId`], logs its outcome and latency and sets the
/// response headers shared by the whole API.
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request tracing",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        let trace = RequestTrace {
            id: RequestId::from_header(request.headers().get_one(REQUEST_ID_HEADER)),
            started: Instant::now(),
        };
        debug!(request_id = %trace.id.0, method = %request.method(), uri = %request.uri(), "request received");
        request.local_cache(|| Some(trace));
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        for (name, value) in SECURITY_HEADERS {
            response.set_header(Header::new(name, value));
        }
        let Some(trace) = trace_of(request) else {
            return;
        };
        response.set_header(Header::new(REQUEST_ID_HEADER, trace.id.0.clone()));

        let status = response.status().code;
        let elapsed_ms = trace.started.elapsed().as_millis() as u64;
        if status >= 400 {
            warn!(request_id = %trace.id.0, method = %request.method(), uri = %request.uri(), status, elapsed_ms, "request failed");
        } else {
            info!(request_id = %trace.id.0, method = %request.method(), uri = %request.uri(), status, elapsed_ms, "request served");
        }
    }
}

/// `User-Agent` of the caller, as recorded on sessions and activity entries.
pub struct UserAgent(pub Option<String>);

impl UserAgent {
    fn from_header(value: Option<&str>) -> Self {
        let ua = value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| v.chars().take(MAX_USER_AGENT_LEN).collect());
        UserAgent(ua)
    }
}

/// Caller address. Rocket honours `X-Real-IP` before the socket address.
pub struct ClientIp(pub Option<String>);

/// Request metadata guards that never fail and add nothing to the OpenAPI document.
macro_rules! metadata_guard {
    ($guard:ident, |$req:ident| $extract:expr) => {
        #[rocket::async_trait]
        impl<'r> FromRequest<'r> for $guard {
            type Error = ();

            async fn from_request($req: &'r Request<'_>) -> Outcome<Self, ()> {
                Outcome::Success($extract)
            }
        }

        impl<'a> OpenApiFromRequest<'a> for $guard {
            fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
                Ok(RequestHeaderInput::None)
            }
        }
    };
}

metadata_guard!(UserAgent, |req| UserAgent::from_header(req.headers().get_one("User-Agent")));
metadata_guard!(ClientIp, |req| ClientIp(req.client_ip().map(|ip| ip.to_string())));

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{API, test_client};
    use rocket::http::Header;

    #[test]
    fn malformed_request_ids_are_replaced() {
        let incoming = Uuid::new_v4().to_string();
        assert_eq!(RequestId::from_header(Some(&incoming)).0, incoming);

        let replaced = RequestId::from_header(Some("<script>"));
        assert!(Uuid::parse_str(&replaced.0).is_ok());
        assert_ne!(RequestId::from_header(None), RequestId::from_header(None));
    }

    #[test]
    fn user_agent_is_trimmed_and_bounded() {
        assert_eq!(UserAgent::from_header(Some("  curl/8.0 ")).0.as_deref(), Some("curl/8.0"));
        assert_eq!(UserAgent::from_header(Some("   ")).0, None);
        let long = "x".repeat(1000);
        assert_eq!(UserAgent::from_header(Some(&long)).0.map(|ua| ua.len()), Some(MAX_USER_AGENT_LEN));
    }

    #[rocket::async_test]
    async fn responses_echo_request_id() {
        let client = test_client().await;
        let id = Uuid::new_v4().to_string();
        let response = client
            .get(format!("{}/health", API))
            .header(Header::new(REQUEST_ID_HEADER, id.clone()))
            .dispatch()
            .await;
        assert_eq!(response.headers().get_one(REQUEST_ID_HEADER), Some(id.as_str()));
        assert_eq!(response.headers().get_one("Cache-Control"), Some("no-store"));
    }
}
