//! Per-client-IP token bucket, applied only when `rateLimit.enabled` (§5:
//! "there is none [backpressure] at the protocol layer... the server may
//! apply rate limiting, configurable, off by default").

use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, HttpResponse};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::{ready, Ready};
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

struct Limiter {
    enabled: bool,
    max_requests: u32,
    window: Duration,
    buckets: Mutex<HashMap<IpAddr, Bucket>>,
}

impl Limiter {
    fn allow(&self, ip: IpAddr) -> bool {
        if !self.enabled {
            return true;
        }
        let mut buckets = self.buckets.lock();
        let now = Instant::now();
        let refill_rate = self.max_requests as f64 / self.window.as_secs_f64();
        let bucket = buckets.entry(ip).or_insert_with(|| Bucket { tokens: self.max_requests as f64, last_refill: now });
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_rate).min(self.max_requests as f64);
        bucket.last_refill = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Clone)]
pub struct RateLimit {
    limiter: Arc<Limiter>,
}

impl RateLimit {
    pub fn new(enabled: bool, max_requests: u32, window: Duration) -> Self {
        RateLimit {
            limiter: Arc::new(Limiter { enabled, max_requests, window, buckets: Mutex::new(HashMap::new()) }),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddleware { service, limiter: self.limiter.clone() }))
    }
}

pub struct RateLimitMiddleware<S> {
    service: S,
    limiter: Arc<Limiter>,
}

impl<S, B> Service<ServiceRequest> for RateLimitMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let ip = req.peer_addr().map(|a| a.ip());
        let allowed = match ip {
            Some(ip) => self.limiter.allow(ip),
            None => true,
        };
        if allowed {
            let fut = self.service.call(req);
            Box::pin(async move { fut.await.map(ServiceResponse::map_into_left_body) })
        } else {
            let response = HttpResponse::TooManyRequests().json(serde_json::json!({"error": "rate limit exceeded"}));
            Box::pin(async move { Ok(req.into_response(response).map_into_right_body()) })
        }
    }
}
