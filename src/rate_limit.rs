//! RateLimiter — multi-dimensional admission control (spec.md §4.2).
//!
//! Sliding-window dimensions are hand-rolled, generalizing the teacher's
//! single `Mutex<HashMap<String, Vec<Instant>>>` (`src/rate_limit.rs`) to a
//! `dashmap`-sharded map so unrelated subjects never contend on one lock.
//! The per-user burst (token-bucket) dimension is backed by `governor`'s
//! keyed, dashmap-state rate limiter — the crate the LLM-adapter example
//! depends on for exactly this purpose.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DashMapStateStore;
use governor::{Quota, RateLimiter as GovernorLimiter};
use rocket::http::Header;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::Request;

use crate::config::RateLimitSettings;
use crate::metrics::MetricsRegistry;
use crate::models::Decision;

/// Limit/remaining/reset for the dimension a request was admitted on,
/// surfaced as `X-RateLimit-*` headers (spec.md §4.2). Mirrors the teacher's
/// `RateLimitInfo` (`examples/Humans-Not-Required-local-agent-chat/src/rate_limit.rs`).
#[derive(Debug, Clone, Copy)]
pub struct RateLimitHeaders {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: chrono::DateTime<chrono::Utc>,
}

/// Wrapper that attaches `X-RateLimit-*` headers to any JSON response,
/// grounded on the teacher's `RateLimited<T>` responder.
pub struct RateLimited<T> {
    inner: Json<T>,
    headers: RateLimitHeaders,
}

impl<T> RateLimited<T> {
    pub fn new(inner: T, headers: RateLimitHeaders) -> Self {
        Self {
            inner: Json(inner),
            headers,
        }
    }
}

impl<'r, 'o: 'r, T: serde::Serialize + 'o> Responder<'r, 'o> for RateLimited<T> {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let reset_secs = (self.headers.reset_at - chrono::Utc::now()).num_seconds().max(0);
        let response = Response::build_from(self.inner.respond_to(req)?)
            .header(Header::new("X-RateLimit-Limit", self.headers.limit.to_string()))
            .header(Header::new("X-RateLimit-Remaining", self.headers.remaining.to_string()))
            .header(Header::new("X-RateLimit-Reset", reset_secs.to_string()))
            .finalize();
        Ok(response)
    }
}

/// The six admission dimensions of spec.md §4.2's table, evaluated in this
/// order — first deny wins. Display matches spec.md §9's required tier
/// labels exactly (`per_user_minute` etc.), resolving the source's coarser
/// undifferentiated `per_user` reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitDimension {
    PerUserMinute,
    PerUserHour,
    PerUserDay,
    PerUserBurst,
    Global,
    PerIp,
}

impl fmt::Display for RateLimitDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RateLimitDimension::PerUserMinute => "per_user_minute",
            RateLimitDimension::PerUserHour => "per_user_hour",
            RateLimitDimension::PerUserDay => "per_user_day",
            RateLimitDimension::PerUserBurst => "per_user_burst",
            RateLimitDimension::Global => "global",
            RateLimitDimension::PerIp => "per_ip",
        };
        f.write_str(s)
    }
}

struct SlidingWindow {
    limit: u32,
    window: Duration,
    hits: DashMap<String, Mutex<Vec<Instant>>>,
}

impl SlidingWindow {
    fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            hits: DashMap::new(),
        }
    }

    /// Purge entries outside the window, then admit iff count < limit.
    /// Returns (admitted, remaining, seconds_until_oldest_expires).
    fn check(&self, key: &str) -> (bool, u32, u64) {
        let now = Instant::now();
        let entry = self
            .hits
            .entry(key.to_string())
            .or_insert_with(|| Mutex::new(Vec::new()));
        let mut timestamps = entry.lock().unwrap_or_else(|e| e.into_inner());

        timestamps.retain(|t| now.duration_since(*t) < self.window);

        if (timestamps.len() as u32) < self.limit {
            timestamps.push(now);
            let remaining = self.limit - timestamps.len() as u32;
            (true, remaining, 0)
        } else {
            let retry_after = timestamps
                .first()
                .map(|oldest| {
                    let elapsed = now.duration_since(*oldest);
                    self.window.saturating_sub(elapsed).as_secs().max(1)
                })
                .unwrap_or(self.window.as_secs());
            (false, 0, retry_after)
        }
    }
}

type KeyedBurstLimiter = GovernorLimiter<String, DashMapStateStore<String>, DefaultClock>;

/// Admission control across all six dimensions of spec.md §4.2.
pub struct RateLimiter {
    per_user_minute: SlidingWindow,
    per_user_hour: SlidingWindow,
    per_user_day: SlidingWindow,
    global_minute: SlidingWindow,
    per_ip_minute: SlidingWindow,
    burst: KeyedBurstLimiter,
    burst_capacity: u32,
    clock: DefaultClock,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        let refill_per_minute = settings.per_user_burst_refill_per_minute.max(1);
        let quota = Quota::per_minute(NonZeroU32::new(refill_per_minute).unwrap())
            .allow_burst(NonZeroU32::new(settings.per_user_burst_capacity.max(1)).unwrap());

        Self {
            per_user_minute: SlidingWindow::new(settings.per_user_minute, Duration::from_secs(60)),
            per_user_hour: SlidingWindow::new(settings.per_user_hour, Duration::from_secs(3600)),
            per_user_day: SlidingWindow::new(settings.per_user_day, Duration::from_secs(86_400)),
            global_minute: SlidingWindow::new(settings.global_per_minute, Duration::from_secs(60)),
            per_ip_minute: SlidingWindow::new(settings.per_ip_per_minute, Duration::from_secs(60)),
            burst: GovernorLimiter::dashmap(quota),
            burst_capacity: settings.per_user_burst_capacity,
            clock: DefaultClock::default(),
        }
    }

    /// Evaluate every dimension in spec.md §4.2's order; the first deny
    /// wins. Non-blocking and bounded — no suspension point here.
    pub fn check(&self, subject: &str, ip: &str) -> Decision {
        self.check_with_metrics(subject, ip, None)
    }

    /// Same as `check`, additionally recording a `rate_limit_deny_total`
    /// metric on the dimension that denied (spec.md §8).
    pub fn check_with_metrics(&self, subject: &str, ip: &str, metrics: Option<&MetricsRegistry>) -> Decision {
        let now = chrono::Utc::now();

        macro_rules! deny_and_record {
            ($dimension:expr, $limit:expr, $retry_after:expr) => {{
                if let Some(m) = metrics {
                    m.record_rate_limit_deny($dimension);
                }
                return deny($dimension, $limit, $retry_after);
            }};
        }

        let (ok, remaining, retry_after) = self.per_user_minute.check(subject);
        if !ok {
            deny_and_record!(RateLimitDimension::PerUserMinute, self.per_user_minute.limit, retry_after);
        }
        let (ok, _, retry_after) = self.per_user_hour.check(subject);
        if !ok {
            deny_and_record!(RateLimitDimension::PerUserHour, self.per_user_hour.limit, retry_after);
        }
        let (ok, _, retry_after) = self.per_user_day.check(subject);
        if !ok {
            deny_and_record!(RateLimitDimension::PerUserDay, self.per_user_day.limit, retry_after);
        }

        match self.burst.check_key(&subject.to_string()) {
            Ok(_) => {}
            Err(not_until) => {
                let wait = not_until.wait_time_from(self.clock.now());
                deny_and_record!(RateLimitDimension::PerUserBurst, self.burst_capacity, wait.as_secs().max(1));
            }
        }

        let (ok, _, retry_after) = self.global_minute.check("global");
        if !ok {
            deny_and_record!(RateLimitDimension::Global, self.global_minute.limit, retry_after);
        }
        let (ok, _, retry_after) = self.per_ip_minute.check(ip);
        if !ok {
            deny_and_record!(RateLimitDimension::PerIp, self.per_ip_minute.limit, retry_after);
        }

        Decision::Admit {
            limit: self.per_user_minute.limit,
            remaining,
            reset_at: now + chrono::Duration::seconds(60),
        }
    }

    pub fn burst_capacity(&self) -> u32 {
        self.burst_capacity
    }
}

fn deny(dimension: RateLimitDimension, limit: u32, retry_after_secs: u64) -> Decision {
    Decision::Deny {
        limit_type: dimension.to_string(),
        limit,
        retry_after_secs: retry_after_secs.clamp(1, 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter_with(settings: RateLimitSettings) -> RateLimiter {
        RateLimiter::new(&settings)
    }

    #[test]
    fn tenth_request_in_window_admitted_eleventh_denied() {
        let mut settings = RateLimitSettings::default();
        settings.per_user_minute = 10;
        settings.per_user_hour = 1000;
        settings.per_user_day = 10000;
        settings.global_per_minute = 10000;
        settings.per_ip_per_minute = 10000;
        settings.per_user_burst_capacity = 10000;
        settings.per_user_burst_refill_per_minute = 10000;
        let limiter = limiter_with(settings);

        for i in 0..10 {
            let decision = limiter.check("user-1", "1.2.3.4");
            assert!(
                matches!(decision, Decision::Admit { .. }),
                "request {i} should be admitted"
            );
        }
        let decision = limiter.check("user-1", "1.2.3.4");
        match decision {
            Decision::Deny { limit_type, .. } => assert_eq!(limit_type, "per_user_minute"),
            _ => panic!("11th request should be denied"),
        }
    }

    #[test]
    fn different_subjects_do_not_contend() {
        let mut settings = RateLimitSettings::default();
        settings.per_user_minute = 1;
        let limiter = limiter_with(settings);

        assert!(matches!(
            limiter.check("user-a", "1.1.1.1"),
            Decision::Admit { .. }
        ));
        assert!(matches!(
            limiter.check("user-b", "1.1.1.2"),
            Decision::Admit { .. }
        ));
    }

    #[test]
    fn per_ip_dimension_denies_independently_of_user() {
        let mut settings = RateLimitSettings::default();
        settings.per_ip_per_minute = 1;
        settings.per_user_minute = 10000;
        settings.per_user_hour = 10000;
        settings.per_user_day = 10000;
        settings.global_per_minute = 10000;
        settings.per_user_burst_capacity = 10000;
        settings.per_user_burst_refill_per_minute = 10000;
        let limiter = limiter_with(settings);

        assert!(matches!(
            limiter.check("user-x", "9.9.9.9"),
            Decision::Admit { .. }
        ));
        match limiter.check("user-y", "9.9.9.9") {
            Decision::Deny { limit_type, .. } => assert_eq!(limit_type, "per_ip"),
            other => panic!("expected per-ip deny, got {other:?}"),
        }
    }
}
