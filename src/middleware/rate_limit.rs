use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::auth::USER_COOKIE;
use crate::config::RateLimitConfig;
use crate::middleware::request_id_of;
use rocket::http::{Method, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse, Responses};
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Limits are counted separately for reads, writes and credential checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Bucket {
    Read,
    Write,
    Credentials,
}

impl Bucket {
    fn for_method(method: Method) -> Self {
        match method {
            Method::Get | Method::Head | Method::Options => Bucket::Read,
            _ => Bucket::Write,
        }
    }
}

/// Who a hit is charged to. A request is charged to its address and, once signed in, to its user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Caller {
    Address(String),
    Account(Uuid),
}

#[derive(Debug, Clone, Copy)]
struct Window {
    opened: Instant,
    hits: u32,
}

#[derive(Debug)]
pub(crate) struct RateLimiter {
    config: RateLimitConfig,
    window: Duration,
    windows: Mutex<HashMap<(Caller, Bucket), Window>>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let window = Duration::from_secs(config.window_seconds.max(1));
        Self {
            config,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Drops expired windows so idle callers do not accumulate.
    pub fn spawn_cleanup_task(self: Arc<Self>) {
        let every = Duration::from_secs(self.config.cleanup_interval_seconds.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                let now = Instant::now();
                self.windows.lock().await.retain(|_, w| now.duration_since(w.opened) < self.window);
            }
        });
    }

    fn limit(&self, bucket: Bucket) -> u32 {
        match bucket {
            Bucket::Read => self.config.read_limit,
            Bucket::Write => self.config.mutation_limit,
            Bucket::Credentials => self.config.auth_limit,
        }
    }

    /// Charges one hit to every caller, or none of them when any is over its limit.
    /// Returns how long the most constrained caller must wait.
    async fn charge(&self, callers: &[Caller], bucket: Bucket) -> Result<(), Duration> {
        let limit = self.limit(bucket);
        let now = Instant::now();
        let mut windows = self.windows.lock().await;

        let mut wait: Option<Duration> = None;
        for caller in callers {
            let window = windows.entry((caller.clone(), bucket)).or_insert(Window { opened: now, hits: 0 });
            if now.duration_since(window.opened) >= self.window {
                *window = Window { opened: now, hits: 0 };
            }
            if window.hits >= limit {
                let remaining = self.window.saturating_sub(now.duration_since(window.opened));
                wait = Some(wait.map_or(remaining, |w| w.max(remaining)));
            }
        }

        if let Some(wait) = wait {
            return Err(wait);
        }

        for caller in callers {
            if let Some(window) = windows.get_mut(&(caller.clone(), bucket)) {
                window.hits += 1;
            }
        }
        Ok(())
    }
}

/// Seconds until the caller may retry, picked up by the 429 catcher.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RateLimitRetryAfter(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RateLimitError {
    TooManyRequests,
    MissingClientIp,
}

/// The signed-in user as claimed by the private cookie. Only scopes the counter.
fn claimed_account(request: &Request<'_>) -> Option<Uuid> {
    let cookie = request.cookies().get_private(USER_COOKIE)?;
    Uuid::parse_str(cookie.value()).ok()
}

async fn throttle(request: &Request<'_>, bucket: Bucket) -> Outcome<(), RateLimitError> {
    let Some(limiter) = request.rocket().state::<Arc<RateLimiter>>() else {
        return Outcome::Success(());
    };
    let request_id = request_id_of(request);

    let mut callers: Vec<Caller> = request.client_ip().map(|ip| Caller::Address(ip.to_string())).into_iter().collect();
    if callers.is_empty() {
        if limiter.config.require_client_ip {
            warn!(request_id = %request_id, uri = %request.uri(), "rejecting request without a client address");
            return Outcome::Error((Status::BadRequest, RateLimitError::MissingClientIp));
        }
        callers.push(Caller::Address("unknown".to_string()));
    }
    callers.extend(claimed_account(request).map(Caller::Account));

    match limiter.charge(&callers, bucket).await {
        Ok(()) => Outcome::Success(()),
        Err(wait) => {
            let seconds = wait.as_secs().max(1);
            request.local_cache(|| Some(RateLimitRetryAfter(seconds)));
            warn!(
                request_id = %request_id,
                bucket = ?bucket,
                uri = %request.uri(),
                retry_after_secs = seconds,
                "rate limit exceeded"
            );
            Outcome::Error((Status::TooManyRequests, RateLimitError::TooManyRequests))
        }
    }
}

fn too_many_requests_response() -> rocket_okapi::Result<Responses> {
    let mut responses = Responses::default();
    responses.responses.insert(
        "429".to_string(),
        RefOr::Object(OpenApiResponse {
            description: "Too Many Requests".to_string(),
            ..Default::default()
        }),
    );
    Ok(responses)
}

macro_rules! throttle_guard {
    ($(#[$doc:meta])* $guard:ident, $bucket:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy)]
        pub(crate) struct $guard;

        #[rocket::async_trait]
        impl<'r> FromRequest<'r> for $guard {
            type Error = RateLimitError;

            async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
                let bucket: fn(&Request<'_>) -> Bucket = $bucket;
                throttle(request, bucket(request)).await.map(|_| $guard)
            }
        }

        impl<'a> OpenApiFromRequest<'a> for $guard {
            fn from_request_input(_gen: &mut OpenApiGenerator, _name: String, _required: bool) -> rocket_okapi::Result<RequestHeaderInput> {
                Ok(RequestHeaderInput::None)
            }

            fn get_responses(_gen: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
                too_many_requests_response()
            }
        }
    };
}

throttle_guard!(
    /// Read or write budget depending on the request method.
    RateLimit,
    |request| Bucket::for_method(request.method())
);

throttle_guard!(
    /// Tighter budget for login, signup, token and 2FA endpoints.
    AuthRateLimit,
    |_| Bucket::Credentials
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::error::too_many_requests;
    use crate::test_utils::{API, test_config};
    use rocket::http::{ContentType, Status};
    use rocket::local::asynchronous::Client;
    use rocket::{catchers, get, routes};
    use serde_json::json;

    fn limiter(read: u32, write: u32, window_seconds: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            read_limit: read,
            mutation_limit: write,
            auth_limit: 1,
            window_seconds,
            cleanup_interval_seconds: 60,
            require_client_ip: false,
        })
    }

    fn address(ip: &str) -> Caller {
        Caller::Address(ip.to_string())
    }

    #[get("/ping")]
    async fn ping(_rate_limit: RateLimit) -> Status {
        Status::Ok
    }

    #[rocket::async_test]
    async fn buckets_are_counted_separately() {
        let limiter = limiter(2, 1, 60);
        let callers = [address("10.1.1.1")];

        assert!(limiter.charge(&callers, Bucket::Write).await.is_ok());
        assert!(limiter.charge(&callers, Bucket::Write).await.is_err());
        assert!(limiter.charge(&callers, Bucket::Read).await.is_ok());
        assert!(limiter.charge(&callers, Bucket::Read).await.is_ok());
        assert!(limiter.charge(&callers, Bucket::Read).await.is_err());
        assert!(limiter.charge(&[address("10.1.1.2")], Bucket::Read).await.is_ok());
    }

    #[rocket::async_test]
    async fn window_expiry_restores_budget() {
        let limiter = limiter(1, 1, 1);
        let callers = [address("10.1.1.1")];
        assert!(limiter.charge(&callers, Bucket::Read).await.is_ok());
        assert!(limiter.charge(&callers, Bucket::Read).await.is_err());

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(limiter.charge(&callers, Bucket::Read).await.is_ok());
    }

    #[rocket::async_test]
    async fn rejected_hits_are_not_charged() {
        let limiter = limiter(1, 1, 60);
        let account = Caller::Account(Uuid::new_v4());
        assert!(limiter.charge(&[address("10.0.0.1"), account.clone()], Bucket::Read).await.is_ok());

        // The account is exhausted, so the fresh address must not be charged either.
        assert!(limiter.charge(&[address("10.0.0.2"), account], Bucket::Read).await.is_err());
        assert!(limiter.charge(&[address("10.0.0.2")], Bucket::Read).await.is_ok());
    }

    #[test]
    fn safe_methods_use_the_read_budget() {
        assert_eq!(Bucket::for_method(Method::Get), Bucket::Read);
        assert_eq!(Bucket::for_method(Method::Options), Bucket::Read);
        assert_eq!(Bucket::for_method(Method::Patch), Bucket::Write);
        assert_eq!(Bucket::for_method(Method::Delete), Bucket::Write);
    }

    #[rocket::async_test]
    async fn exhausted_budget_answers_with_retry_after() {
        let rocket = rocket::build()
            .manage(Arc::new(limiter(0, 0, 30)))
            .mount("/", routes![ping])
            .register("/", catchers![too_many_requests]);
        let client = Client::tracked(rocket).await.expect("valid rocket instance");

        let response = client.get("/ping").dispatch().await;
        assert_eq!(response.status(), Status::TooManyRequests);
        assert_eq!(response.headers().get_one("Retry-After"), Some("30"));
        assert_eq!(response.content_type(), Some(ContentType::JSON));
    }

    #[rocket::async_test]
    async fn login_attempts_share_the_credentials_budget() {
        let mut config = test_config();
        config.rate_limit.auth_limit = 2;
        let client = Client::tracked(crate::build_rocket(config)).await.expect("valid rocket instance");
        let attempt = || {
            client
                .post(format!("{}/auth/login", API))
                .header(ContentType::JSON)
                .body(json!({ "email": "nobody@example.com", "password": "Wrong123!" }).to_string())
                .dispatch()
        };

        assert_eq!(attempt().await.status(), Status::Unauthorized);
        assert_eq!(attempt().await.status(), Status::Unauthorized);
        assert_eq!(attempt().await.status(), Status::TooManyRequests);
        assert_eq!(client.get(format!("{}/health", API)).dispatch().await.status(), Status::Ok);
    }
}
