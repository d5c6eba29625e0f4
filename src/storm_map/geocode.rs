// storm_map - Heat map of recent storm reports served over HTTP
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::report::GeoPoint;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::error;
use std::fmt;
use std::future::Future;
use std::time::Duration;

#[derive(Debug)]
pub enum GeocodeError {
    Timeout(Url),
    Service(String),
    Internal(reqwest::Error),
    MalformedInput(GeoPoint),
    Rejected(StatusCode, Url),
    InvalidUrl(String),
}

impl GeocodeError {
    /// Timeouts and upstream service failures are worth another attempt, anything
    /// caused by the request itself is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Service(_) | Self::Internal(_))
    }

    fn from_reqwest(e: reqwest::Error, url: &Url) -> Self {
        if e.is_timeout() {
            Self::Timeout(url.clone())
        } else {
            Self::Internal(e)
        }
    }
}

impl fmt::Display for GeocodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(url) => write!(f, "timed out requesting {}", url),
            Self::Service(msg) => write!(f, "geocoding service error: {}", msg),
            Self::Internal(e) => write!(f, "{}", e),
            Self::MalformedInput(p) => write!(f, "invalid coordinates {},{}", p.latitude, p.longitude),
            Self::Rejected(status, url) => write!(f, "request rejected with status {} for {}", status, url),
            Self::InvalidUrl(u) => write!(f, "invalid geocoder URL {}", u),
        }
    }
}

impl error::Error for GeocodeError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Self::Internal(e) => Some(e),
            _ => None,
        }
    }
}

/// Single reverse geocoding attempt: coordinates to a postal code.
///
/// Implementations make exactly one attempt per call. `Ok(None)` means the service answered
/// but had no postal code for the location.
pub trait Geocoder {
    fn reverse(&self, point: GeoPoint) -> impl Future<Output = Result<Option<String>, GeocodeError>> + Send;
}

/// Outcome of looking up the postal code for one point after any retries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostalLookup {
    pub postal_code: Option<String>,
}

impl PostalLookup {
    pub fn found<S: Into<String>>(postal_code: S) -> Self {
        PostalLookup {
            postal_code: Some(postal_code.into()),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }
}

/// Number of attempts and exponential backoff between them.
///
/// The delay after failed attempt `n` (starting at zero) is `backoff_factor * 2^n` seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    retries: u32,
    backoff_factor: f64,
}

impl RetryPolicy {
    pub const DEFAULT_RETRIES: u32 = 3;
    pub const DEFAULT_BACKOFF_FACTOR: f64 = 0.3;

    /// Create a new policy, or `None` if `retries` is zero or `backoff_factor` is negative
    /// or not finite.
    pub fn new(retries: u32, backoff_factor: f64) -> Option<Self> {
        if retries == 0 || !backoff_factor.is_finite() || backoff_factor < 0.0 {
            None
        } else {
            Some(RetryPolicy { retries, backoff_factor })
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        Duration::try_from_secs_f64(self.backoff_factor * 2f64.powi(exp)).unwrap_or(Duration::MAX)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retries: Self::DEFAULT_RETRIES,
            backoff_factor: Self::DEFAULT_BACKOFF_FACTOR,
        }
    }
}

/// Wrapper around a `Geocoder` that retries transient failures and never fails.
///
/// Errors that aren't retryable, or that persist after every attempt allowed by the
/// `RetryPolicy`, are logged and turned into an empty `PostalLookup`.
#[derive(Debug)]
pub struct RetryingGeocoder<G> {
    inner: G,
    policy: RetryPolicy,
}

impl<G> RetryingGeocoder<G>
where
    G: Geocoder,
{
    pub fn new(inner: G, policy: RetryPolicy) -> Self {
        RetryingGeocoder { inner, policy }
    }

    pub async fn lookup(&self, point: GeoPoint) -> PostalLookup {
        let retries = self.policy.retries;

        for attempt in 0..retries {
            match self.inner.reverse(point).await {
                Ok(postal_code) => return PostalLookup { postal_code },
                Err(e) if !e.is_retryable() => {
                    tracing::warn!(message = "geocoding failed, not retrying", error = %e);
                    return PostalLookup::none();
                }
                Err(e) if attempt + 1 == retries => {
                    tracing::warn!(
                        message = "geocoding failed, giving up",
                        error = %e,
                        attempts = retries,
                        latitude = point.latitude,
                        longitude = point.longitude,
                    );
                }
                Err(e) => {
                    let delay = self.policy.delay(attempt);
                    tracing::warn!(
                        message = "geocoding failed, retrying",
                        error = %e,
                        attempt = attempt + 1,
                        delay_secs = delay.as_secs_f64(),
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }

        PostalLookup::none()
    }
}

/// Client for a Nominatim compatible reverse geocoding API.
#[derive(Debug)]
pub struct NominatimClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl NominatimClient {
    const USER_AGENT: &'static str = concat!("storm_map/", env!("CARGO_PKG_VERSION"));
    const JSON_RESPONSE: &'static str = "application/json";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(client: Client, base_url: &str, timeout: Duration) -> Result<Self, GeocodeError> {
        let base_url = Url::parse(base_url).map_err(|_| GeocodeError::InvalidUrl(base_url.to_owned()))?;
        if base_url.cannot_be_a_base() {
            return Err(GeocodeError::InvalidUrl(base_url.to_string()));
        }

        Ok(NominatimClient {
            client,
            base_url,
            timeout,
        })
    }

    fn reverse_url(&self, point: GeoPoint) -> Url {
        let mut url = self.base_url.clone();
        {
            // Checked for cannot-be-a-base URLs on construction
            if let Ok(mut p) = url.path_segments_mut() {
                p.pop_if_empty().push("reverse");
            }
        }

        url.query_pairs_mut()
            .append_pair("format", "jsonv2")
            .append_pair("lat", &point.latitude.to_string())
            .append_pair("lon", &point.longitude.to_string())
            .append_pair("addressdetails", "1");

        url
    }
}

impl Geocoder for NominatimClient {
    async fn reverse(&self, point: GeoPoint) -> Result<Option<String>, GeocodeError> {
        if !point.is_valid() {
            return Err(GeocodeError::MalformedInput(point));
        }

        let url = self.reverse_url(point);
        tracing::debug!(message = "making reverse geocoding request", url = %url);

        let res = self
            .client
            .get(url.clone())
            .header(USER_AGENT, Self::USER_AGENT)
            .header(ACCEPT, Self::JSON_RESPONSE)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| GeocodeError::from_reqwest(e, &url))?;

        let status = res.status();
        if status == StatusCode::OK {
            let place = res
                .json::<ReversePlace>()
                .await
                .map_err(|e| GeocodeError::from_reqwest(e, &url))?;

            Ok(place.address.and_then(|a| a.postcode).filter(|p| !p.trim().is_empty()))
        } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(GeocodeError::Service(format!("unexpected status {} for {}", status, url)))
        } else {
            Err(GeocodeError::Rejected(status, url))
        }
    }
}

#[derive(Deserialize, Debug)]
struct ReversePlace {
    #[serde(default)]
    address: Option<Address>,
}

#[derive(Deserialize, Debug)]
struct Address {
    #[serde(default)]
    postcode: Option<String>,
}

#[cfg(test)]
mod test {
    use super::{GeocodeError, Geocoder, NominatimClient, PostalLookup, RetryPolicy, RetryingGeocoder};
    use crate::report::GeoPoint;
    use reqwest::{Client, Url};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Returns canned results in order, then `Service` errors once they run out.
    struct Scripted {
        results: Mutex<VecDeque<Result<Option<String>, GeocodeError>>>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(results: Vec<Result<Option<String>, GeocodeError>>) -> Self {
            Scripted {
                results: Mutex::new(results.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Geocoder for &Scripted {
        async fn reverse(&self, _point: GeoPoint) -> Result<Option<String>, GeocodeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GeocodeError::Service("no more results".to_owned())))
        }
    }

    fn timeout() -> GeocodeError {
        GeocodeError::Timeout(Url::parse("http://localhost/reverse").unwrap())
    }

    fn point() -> GeoPoint {
        GeoPoint::new(39.53, -104.14)
    }

    #[test]
    fn test_policy_rejects_invalid() {
        assert!(RetryPolicy::new(0, 0.3).is_none());
        assert!(RetryPolicy::new(3, -0.1).is_none());
        assert!(RetryPolicy::new(3, f64::NAN).is_none());
        assert!(RetryPolicy::new(1, 0.0).is_some());
    }

    #[test]
    fn test_policy_delay() {
        let policy = RetryPolicy::new(4, 0.5).unwrap();
        assert_eq!(Duration::from_millis(500), policy.delay(0));
        assert_eq!(Duration::from_secs(1), policy.delay(1));
        assert_eq!(Duration::from_secs(2), policy.delay(2));
        assert_eq!(Duration::MAX, policy.delay(u32::MAX));
    }

    #[test]
    fn test_retryable() {
        assert!(timeout().is_retryable());
        assert!(GeocodeError::Service("503".to_owned()).is_retryable());
        assert!(!GeocodeError::MalformedInput(point()).is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_first_attempt() {
        let scripted = Scripted::new(vec![Ok(Some("80202".to_owned()))]);
        let geocoder = RetryingGeocoder::new(&scripted, RetryPolicy::default());

        assert_eq!(PostalLookup::found("80202"), geocoder.lookup(point()).await);
        assert_eq!(1, scripted.calls());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_retries_then_succeeds() {
        let scripted = Scripted::new(vec![Err(timeout()), Ok(Some("80301".to_owned()))]);
        let geocoder = RetryingGeocoder::new(&scripted, RetryPolicy::new(3, 0.5).unwrap());
        let start = tokio::time::Instant::now();

        assert_eq!(PostalLookup::found("80301"), geocoder.lookup(point()).await);
        assert_eq!(2, scripted.calls());

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(510), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_exhausted() {
        let scripted = Scripted::new(vec![Err(timeout()), Err(timeout()), Err(timeout()), Ok(Some("1".to_owned()))]);
        let geocoder = RetryingGeocoder::new(&scripted, RetryPolicy::new(3, 0.5).unwrap());
        let start = tokio::time::Instant::now();

        assert_eq!(PostalLookup::none(), geocoder.lookup(point()).await);
        assert_eq!(3, scripted.calls());

        // 0.5 + 1.0, nothing after the final failure
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1500), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(1510), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_malformed_not_retried() {
        let scripted = Scripted::new(vec![Err(GeocodeError::MalformedInput(point())), Ok(Some("1".to_owned()))]);
        let geocoder = RetryingGeocoder::new(&scripted, RetryPolicy::default());
        let start = tokio::time::Instant::now();

        assert_eq!(PostalLookup::none(), geocoder.lookup(point()).await);
        assert_eq!(1, scripted.calls());
        assert_eq!(Duration::ZERO, start.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_no_postcode() {
        let scripted = Scripted::new(vec![Ok(None)]);
        let geocoder = RetryingGeocoder::new(&scripted, RetryPolicy::default());

        assert_eq!(PostalLookup::none(), geocoder.lookup(point()).await);
        assert_eq!(1, scripted.calls());
    }

    #[test]
    fn test_reverse_url() {
        let client = NominatimClient::new(Client::new(), "https://geo.example.com/", Duration::from_secs(1)).unwrap();
        let url = client.reverse_url(GeoPoint::new(39.53, -104.14));

        assert_eq!(
            "https://geo.example.com/reverse?format=jsonv2&lat=39.53&lon=-104.14&addressdetails=1",
            url.as_str()
        );
    }

    #[test]
    fn test_reverse_url_with_path() {
        let client = NominatimClient::new(Client::new(), "https://example.com/nominatim", Duration::from_secs(1)).unwrap();
        let url = client.reverse_url(GeoPoint::new(40.0, -105.0));

        assert_eq!(
            "https://example.com/nominatim/reverse?format=jsonv2&lat=40&lon=-105&addressdetails=1",
            url.as_str()
        );
    }

    #[tokio::test]
    async fn test_reverse_invalid_point() {
        let client = NominatimClient::new(Client::new(), "http://127.0.0.1:1/", Duration::from_secs(1)).unwrap();
        let res = client.reverse(GeoPoint::new(120.0, -104.0)).await;

        assert!(matches!(res, Err(GeocodeError::MalformedInput(_))));
    }
}
