//! Integration tests for `NominatimClient` and `RetryingGeocoder` using wiremock HTTP mocks.

use reqwest::{Client, StatusCode};
use std::time::Duration;
use storm_map::geocode::{GeocodeError, Geocoder, NominatimClient, PostalLookup, RetryPolicy, RetryingGeocoder};
use storm_map::report::GeoPoint;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_client(server: &MockServer, timeout: Duration) -> NominatimClient {
    NominatimClient::new(Client::new(), &server.uri(), timeout).expect("client construction should not fail")
}

fn denver() -> GeoPoint {
    GeoPoint::new(39.74, -104.99)
}

fn place(postcode: &str) -> serde_json::Value {
    serde_json::json!({
        "place_id": 123,
        "display_name": "Denver, Colorado, United States",
        "address": {
            "city": "Denver",
            "state": "Colorado",
            "postcode": postcode,
            "country_code": "us"
        }
    })
}

#[tokio::test]
async fn reverse_returns_postcode() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/reverse"))
        .and(query_param("lat", "39.74"))
        .and(query_param("lon", "-104.99"))
        .and(query_param("format", "jsonv2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(place("80202")))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_client(&server, Duration::from_secs(5));
    let postcode = client.reverse(denver()).await.expect("lookup should succeed");

    assert_eq!(Some("80202".to_owned()), postcode);
}

#[tokio::test]
async fn reverse_without_address() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"error": "Unable to geocode"})))
        .mount(&server)
        .await;

    let client = test_client(&server, Duration::from_secs(5));
    assert_eq!(None, client.reverse(denver()).await.unwrap());
}

#[tokio::test]
async fn reverse_server_error_is_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = test_client(&server, Duration::from_secs(5)).reverse(denver()).await.unwrap_err();
    assert!(matches!(err, GeocodeError::Service(_)), "expected Service, got: {err:?}");
    assert!(err.is_retryable());
}

#[tokio::test]
async fn reverse_bad_request_is_not_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(ResponseTemplate::new(400))
        .mount(&server)
        .await;

    let err = test_client(&server, Duration::from_secs(5)).reverse(denver()).await.unwrap_err();
    assert!(
        matches!(err, GeocodeError::Rejected(StatusCode::BAD_REQUEST, _)),
        "expected Rejected(400), got: {err:?}"
    );
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn reverse_timeout() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(place("80202")).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let err = test_client(&server, Duration::from_millis(100)).reverse(denver()).await.unwrap_err();
    assert!(matches!(err, GeocodeError::Timeout(_)), "expected Timeout, got: {err:?}");
}

#[tokio::test]
async fn lookup_retries_transient_errors() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(place("80301")))
        .expect(1)
        .mount(&server)
        .await;

    let geocoder = RetryingGeocoder::new(
        test_client(&server, Duration::from_secs(5)),
        RetryPolicy::new(3, 0.0).unwrap(),
    );

    assert_eq!(PostalLookup::found("80301"), geocoder.lookup(denver()).await);
}

#[tokio::test]
async fn lookup_gives_up_after_retries() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let geocoder = RetryingGeocoder::new(
        test_client(&server, Duration::from_secs(5)),
        RetryPolicy::new(2, 0.0).unwrap(),
    );

    assert_eq!(PostalLookup::none(), geocoder.lookup(denver()).await);
}

#[tokio::test]
async fn lookup_invalid_point_makes_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(place("80202")))
        .expect(0)
        .mount(&server)
        .await;

    let geocoder = RetryingGeocoder::new(test_client(&server, Duration::from_secs(5)), RetryPolicy::default());
    assert_eq!(PostalLookup::none(), geocoder.lookup(GeoPoint::new(f64::NAN, -104.99)).await);
}
