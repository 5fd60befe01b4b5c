//! Ultrahuman partner API client
//!
//! Answers "what fraction of this day was the ring worn" from the vendor's
//! daily metrics endpoint. Responses for past days are cached on disk. Any
//! failure degrades to a 0% day and is logged; failures are never cached.

use chrono::{Local, NaiveDate};
use serde::Deserialize;
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::adapters::SAMPLES_PER_DAY;
use crate::cache::ResponseCache;
use crate::config::WearApiConfig;
use crate::error::ComplianceError;

/// Source of daily ring wear percentages
pub trait WearApi: Send + Sync {
    /// Percentage (0-100) of the day the ring was worn
    fn daily_wear_percentage(&self, email: &str, day: NaiveDate) -> f64;
}

/// Raw HTTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Blocking GET transport
pub trait HttpTransport: Send + Sync {
    /// Perform a GET; non-2xx statuses are responses, not errors
    fn get(
        &self,
        url: &str,
        params: &[(&str, &str)],
        authorization: &str,
    ) -> Result<HttpResponse, ComplianceError>;
}

/// [`HttpTransport`] backed by a `ureq` agent
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self { agent }
    }
}

impl HttpTransport for UreqTransport {
    fn get(
        &self,
        url: &str,
        params: &[(&str, &str)],
        authorization: &str,
    ) -> Result<HttpResponse, ComplianceError> {
        let mut request = self.agent.get(url).set("Authorization", authorization);
        for (key, value) in params {
            request = request.query(key, value);
        }

        match request.call() {
            Ok(response) => {
                let status = response.status();
                let body = response.into_string()?;
                Ok(HttpResponse { status, body })
            }
            Err(ureq::Error::Status(status, response)) => Ok(HttpResponse {
                status,
                body: response.into_string().unwrap_or_default(),
            }),
            Err(e) => Err(ComplianceError::VendorApiFailure(e.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Blocking token bucket
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take a token if one is available, otherwise report how long to wait.
    fn take(&self) -> Result<(), Duration> {
        let now = Instant::now();
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.last_refill = now;
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let wait = (1.0 - bucket.tokens) / self.refill_per_sec;
            Err(Duration::try_from_secs_f64(wait).unwrap_or(Duration::from_secs(1)))
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.take().is_ok()
    }

    /// Block until a token is available.
    pub fn acquire(&self) {
        while let Err(wait) = self.take() {
            debug!(wait_ms = wait.as_millis() as u64, "rate limited");
            thread::sleep(wait);
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct MetricsResponse {
    #[serde(default)]
    data: MetricsData,
}

#[derive(Debug, Default, Deserialize)]
struct MetricsData {
    #[serde(default)]
    metric_data: Vec<Metric>,
}

#[derive(Debug, Deserialize)]
struct Metric {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    object: MetricObject,
}

#[derive(Debug, Default, Deserialize)]
struct MetricObject {
    #[serde(default)]
    values: Vec<serde_json::Value>,
}

/// Wear percentage from a metrics body: temperature samples over a full day's worth.
///
/// A body without a `temp` metric, or one that does not parse, reads as 0%.
pub fn wear_percentage_from_body(body: &str) -> f64 {
    let response: MetricsResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "unparsable metrics response");
            return 0.0;
        }
    };
    response
        .data
        .metric_data
        .iter()
        .find(|metric| metric.kind == "temp")
        .map(|metric| metric.object.values.len() as f64 / SAMPLES_PER_DAY as f64 * 100.0)
        .unwrap_or(0.0)
}

/// Ultrahuman metrics client with a read-through cache
pub struct UltrahumanClient {
    endpoint: String,
    credential: String,
    transport: Box<dyn HttpTransport>,
    cache: ResponseCache,
    limiter: TokenBucket,
    today: Option<NaiveDate>,
}

impl UltrahumanClient {
    /// Create a client from configuration, using `ureq` for transport.
    pub fn new(config: &WearApiConfig, cache: ResponseCache) -> Result<Self, ComplianceError> {
        let transport = Box::new(UreqTransport::new(config.timeout()));
        Self::with_transport(config, cache, transport)
    }

    pub fn with_transport(
        config: &WearApiConfig,
        cache: ResponseCache,
        transport: Box<dyn HttpTransport>,
    ) -> Result<Self, ComplianceError> {
        config.validate()?;
        let credential = config.credential.clone().ok_or_else(|| {
            crate::config::ConfigError::MissingCredential("UHKEY".to_string())
        })?;
        let rate = config.requests_per_sec;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            credential,
            transport,
            cache,
            limiter: TokenBucket::new(rate.ceil().max(1.0), rate),
            today: None,
        })
    }

    /// Pin "today" instead of reading the local clock.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    fn today(&self) -> NaiveDate {
        self.today.unwrap_or_else(|| Local::now().date_naive())
    }

    /// Metrics body for one day, from the cache or the API.
    ///
    /// `Ok(None)` means the API answered with a non-success status.
    pub fn fetch_metrics(
        &self,
        email: &str,
        day: NaiveDate,
    ) -> Result<Option<String>, ComplianceError> {
        let date = day.format("%Y-%m-%d").to_string();
        let params = [("email", email), ("date", date.as_str())];
        let key = ResponseCache::cache_key(&self.endpoint, &params);

        match self.cache.get(&key) {
            Ok(Some(body)) => return Ok(Some(body)),
            Ok(None) => {}
            Err(e) => warn!(error = %e, key = %key, "cache read failed"),
        }

        self.limiter.acquire();
        let response = self.transport.get(&self.endpoint, &params, &self.credential)?;
        if response.status != 200 {
            warn!(status = response.status, %day, "metrics request rejected");
            return Ok(None);
        }

        // Today's data is still accumulating
        if day < self.today() {
            if let Err(e) = self.cache.put(&key, &response.body) {
                warn!(error = %e, key = %key, "cache write failed");
            }
        }
        Ok(Some(response.body))
    }
}

impl WearApi for UltrahumanClient {
    fn daily_wear_percentage(&self, email: &str, day: NaiveDate) -> f64 {
        if day > self.today() {
            return 0.0;
        }
        match self.fetch_metrics(email, day) {
            Ok(Some(body)) => wear_percentage_from_body(&body),
            Ok(None) => 0.0,
            Err(e) => {
                warn!(error = %e, %day, "metrics request failed");
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn body_with_samples(n: usize) -> String {
        let values: Vec<_> = (0..n)
            .map(|i| serde_json::json!({"value": 36.5, "timestamp": i}))
            .collect();
        serde_json::json!({
            "data": {
                "metric_data": [
                    {"type": "hr", "object": {"values": [1, 2, 3]}},
                    {"type": "temp", "object": {"values": values}}
                ]
            }
        })
        .to_string()
    }

    #[derive(Default)]
    struct FakeTransport {
        calls: Mutex<Vec<(String, Vec<(String, String)>, String)>>,
        status: u16,
        fail: bool,
        samples: usize,
    }

    impl HttpTransport for Arc<FakeTransport> {
        fn get(
            &self,
            url: &str,
            params: &[(&str, &str)],
            authorization: &str,
        ) -> Result<HttpResponse, ComplianceError> {
            self.calls.lock().unwrap().push((
                url.to_string(),
                params.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
                authorization.to_string(),
            ));
            if self.fail {
                return Err(ComplianceError::VendorApiFailure("connection reset".into()));
            }
            Ok(HttpResponse {
                status: self.status,
                body: body_with_samples(self.samples),
            })
        }
    }

    fn config() -> WearApiConfig {
        WearApiConfig {
            enabled: true,
            endpoint: "https://api.test/metrics".to_string(),
            credential: Some("key-123".to_string()),
            timeout_secs: 1,
            requests_per_sec: 1000.0,
        }
    }

    fn build_client(transport: Arc<FakeTransport>, dir: &TempDir) -> UltrahumanClient {
        UltrahumanClient::with_transport(
            &config(),
            ResponseCache::new(dir.path()),
            Box::new(transport),
        )
        .unwrap()
        .with_today(date(2024, 3, 10))
    }

    #[test]
    fn test_percentage_from_body() {
        assert_eq!(wear_percentage_from_body(&body_with_samples(288)), 100.0);
        assert_eq!(wear_percentage_from_body(&body_with_samples(216)), 75.0);
        assert_eq!(wear_percentage_from_body(r#"{"data":{"metric_data":[]}}"#), 0.0);
        assert_eq!(wear_percentage_from_body("<html>"), 0.0);
    }

    #[test]
    fn test_future_day_makes_no_call() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport {
            status: 200,
            samples: 288,
            ..Default::default()
        });
        let client = build_client(transport.clone(), &dir);

        assert_eq!(client.daily_wear_percentage("a@b.org", date(2024, 3, 11)), 0.0);
        assert!(transport.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_past_day_cached_and_reused() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport {
            status: 200,
            samples: 216,
            ..Default::default()
        });
        let client = build_client(transport.clone(), &dir);

        assert_eq!(client.daily_wear_percentage("a@b.org", date(2024, 3, 9)), 75.0);
        assert_eq!(client.daily_wear_percentage("a@b.org", date(2024, 3, 9)), 75.0);

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let (url, params, auth) = &calls[0];
        assert_eq!(url, "https://api.test/metrics");
        assert_eq!(auth, "key-123");
        assert!(params.contains(&("date".to_string(), "2024-03-09".to_string())));
        assert!(params.contains(&("email".to_string(), "a@b.org".to_string())));
    }

    #[test]
    fn test_today_is_not_cached() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(FakeTransport {
            status: 200,
            samples: 100,
            ..Default::default()
        });
        let client = build_client(transport.clone(), &dir);

        client.daily_wear_percentage("a@b.org", date(2024, 3, 10));
        client.daily_wear_percentage("a@b.org", date(2024, 3, 10));
        assert_eq!(transport.calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_failures_yield_zero_and_are_not_cached() {
        let dir = TempDir::new().unwrap();
        let rejected = Arc::new(FakeTransport {
            status: 401,
            samples: 288,
            ..Default::default()
        });
        let client = build_client(rejected.clone(), &dir);
        assert_eq!(client.daily_wear_percentage("a@b.org", date(2024, 3, 1)), 0.0);
        assert_eq!(client.daily_wear_percentage("a@b.org", date(2024, 3, 1)), 0.0);
        assert_eq!(rejected.calls.lock().unwrap().len(), 2);

        let broken = Arc::new(FakeTransport {
            fail: true,
            ..Default::default()
        });
        let client = build_client(broken.clone(), &dir);
        assert_eq!(client.daily_wear_percentage("a@b.org", date(2024, 3, 2)), 0.0);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_credential_rejected() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config();
        cfg.credential = None;
        let result = UltrahumanClient::new(&cfg, ResponseCache::new(dir.path()));
        assert!(matches!(result, Err(ComplianceError::Config(_))));
    }

    #[test]
    fn test_zero_rate_rejected() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config();
        cfg.requests_per_sec = 0.0;
        let result = UltrahumanClient::with_transport(
            &cfg,
            ResponseCache::new(dir.path()),
            Box::new(Arc::new(FakeTransport::default())),
        );
        assert!(matches!(
            result,
            Err(ComplianceError::Config(ConfigError::Invalid { .. }))
        ));
    }

    #[test]
    fn test_token_bucket() {
        let bucket = TokenBucket::new(2.0, 0.001);
        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());
    }
}
