/// Provider clients against mocked HTTP endpoints.
/// Covers response parsing and status classification without real services.
use cep_geocoder::errors::AppError;
use cep_geocoder::models::GeocodeQuery;
use cep_geocoder::providers::{
    AwesomeApiProvider, BrasilApiProvider, GeocodingProvider, GoogleProvider, NominatimProvider,
    OpenCageProvider,
};
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn cep_query() -> GeocodeQuery {
    GeocodeQuery::new("AVENIDA PAULISTA 1000, SAO PAULO, SP")
        .with_postal_code("01310-100")
        .with_state("SP")
}

#[tokio::test]
async fn test_brasilapi_parses_coordinates() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/cep/v2/01310100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "cep": "01310100",
            "state": "SP",
            "city": "São Paulo",
            "neighborhood": "Bela Vista",
            "street": "Avenida Paulista",
            "location": {
                "type": "Point",
                "coordinates": { "longitude": "-46.6544", "latitude": "-23.5632" }
            }
        })))
        .mount(&mock_server)
        .await;

    let provider = BrasilApiProvider::new(mock_server.uri()).unwrap();
    let hit = provider.geocode(&cep_query()).await.unwrap().unwrap();

    assert!((hit.lat + 23.5632).abs() < 1e-9);
    assert!((hit.lng + 46.6544).abs() < 1e-9);
    assert!(!hit.approximate);
    assert!(hit.display_text.unwrap().contains("Avenida Paulista"));
}

#[tokio::test]
async fn test_brasilapi_without_coordinates_is_a_miss() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/cep/v2/01310100"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "cep": "01310100",
            "state": "SP",
            "city": "São Paulo",
            "location": { "type": "Point", "coordinates": {} }
        })))
        .mount(&mock_server)
        .await;

    let provider = BrasilApiProvider::new(mock_server.uri()).unwrap();
    assert!(provider.geocode(&cep_query()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_brasilapi_unknown_cep_is_a_miss() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/cep/v2/01310100"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let provider = BrasilApiProvider::new(mock_server.uri()).unwrap();
    assert!(provider.geocode(&cep_query()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cep_provider_does_not_call_without_valid_cep() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let provider = BrasilApiProvider::new(mock_server.uri()).unwrap();
    let query = GeocodeQuery::new("RUA AUGUSTA 100").with_postal_code("0130");
    assert!(provider.geocode(&query).await.unwrap().is_none());
}

#[tokio::test]
async fn test_status_classification() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/json/11111111"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/22222222"))
        .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/33333333"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json/44444444"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
        .mount(&mock_server)
        .await;

    let provider = AwesomeApiProvider::new(mock_server.uri()).unwrap();
    let call = |cep: &'static str| {
        let provider = &provider;
        async move { provider.geocode(&GeocodeQuery::new("").with_postal_code(cep)).await }
    };

    let err = call("11111111").await.unwrap_err();
    assert!(err.is_quota_signal());
    assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));

    let err = call("22222222").await.unwrap_err();
    assert!(matches!(err, AppError::Blocked(_)));
    assert!(err.is_quota_signal());

    let err = call("33333333").await.unwrap_err();
    assert!(err.is_transient());

    let err = call("44444444").await.unwrap_err();
    assert!(matches!(err, AppError::ExternalApiError(_)));
    assert!(!err.is_transient());
    assert!(!err.is_quota_signal());
}

#[tokio::test]
async fn test_awesomeapi_parses_string_coordinates() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/json/20040020"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "cep": "20040020",
            "address": "Avenida Rio Branco",
            "district": "Centro",
            "city": "Rio de Janeiro",
            "state": "RJ",
            "lat": "-22.9035",
            "lng": "-43.1766"
        })))
        .mount(&mock_server)
        .await;

    let provider = AwesomeApiProvider::new(mock_server.uri()).unwrap();
    let query = GeocodeQuery::new("").with_postal_code("20040-020");
    let hit = provider.geocode(&query).await.unwrap().unwrap();

    assert!((hit.lat + 22.9035).abs() < 1e-9);
    assert!((hit.lng + 43.1766).abs() < 1e-9);
}

#[tokio::test]
async fn test_google_ok_and_partial_match() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/maps/api/geocode/json"))
        .and(query_param("components", "country:BR|postal_code:01310100"))
        .and(query_param("key", "test_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "OK",
            "results": [{
                "formatted_address": "Av. Paulista, 1000 - Bela Vista, São Paulo - SP",
                "partial_match": true,
                "geometry": {
                    "location": { "lat": -23.5632, "lng": -46.6544 },
                    "location_type": "ROOFTOP"
                }
            }]
        })))
        .mount(&mock_server)
        .await;

    let provider = GoogleProvider::new(mock_server.uri(), "test_key").unwrap();
    let hit = provider.geocode(&cep_query()).await.unwrap().unwrap();

    assert!((hit.lat + 23.5632).abs() < 1e-9);
    assert!(hit.approximate);
}

#[tokio::test]
async fn test_google_body_statuses() {
    let cases = [
        ("ZERO_RESULTS", None),
        ("OVER_QUERY_LIMIT", Some("quota_exceeded")),
        ("REQUEST_DENIED", Some("blocked")),
        ("UNKNOWN_ERROR", Some("transient")),
        ("INVALID_REQUEST", Some("external_api")),
    ];

    for (status, expected) in cases {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/maps/api/geocode/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": status,
                "results": []
            })))
            .mount(&mock_server)
            .await;

        let provider = GoogleProvider::new(mock_server.uri(), "test_key").unwrap();
        let outcome = provider.geocode(&cep_query()).await;
        match expected {
            None => assert!(outcome.unwrap().is_none(), "{}", status),
            Some(kind) => assert_eq!(outcome.unwrap_err().kind(), kind, "{}", status),
        }
    }
}

#[tokio::test]
async fn test_opencage_confidence_and_quota() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/geocode/v1/json"))
        .and(query_param("key", "good_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [{
                "confidence": 3,
                "formatted": "São Paulo, Brasil",
                "geometry": { "lat": -23.55, "lng": -46.63 }
            }]
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/geocode/v1/json"))
        .and(query_param("key", "spent_key"))
        .respond_with(ResponseTemplate::new(402))
        .mount(&mock_server)
        .await;

    let provider = OpenCageProvider::new(mock_server.uri(), "good_key").unwrap();
    let hit = provider.geocode(&cep_query()).await.unwrap().unwrap();
    assert_eq!(hit.confidence, Some(0.3));
    assert!(hit.approximate);

    let spent = OpenCageProvider::new(mock_server.uri(), "spent_key").unwrap();
    let err = spent.geocode(&cep_query()).await.unwrap_err();
    assert_eq!(err.kind(), "quota_exceeded");
}

#[tokio::test]
async fn test_nominatim_search() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("countrycodes", "br"))
        .and(query_param("format", "jsonv2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
            "lat": "-19.9167",
            "lon": "-43.9345",
            "display_name": "Belo Horizonte, Minas Gerais, Brasil",
            "addresstype": "city"
        }])))
        .mount(&mock_server)
        .await;

    let provider = NominatimProvider::new(mock_server.uri(), "cep-geocoder-tests").unwrap();
    let hit = provider
        .geocode(&GeocodeQuery::new("BELO HORIZONTE, MG"))
        .await
        .unwrap()
        .unwrap();

    assert!((hit.lat + 19.9167).abs() < 1e-9);
    assert!(hit.approximate);
}

#[tokio::test]
async fn test_nominatim_empty_result_and_user_agent() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&mock_server)
        .await;

    let provider = NominatimProvider::new(mock_server.uri(), "cep-geocoder-tests").unwrap();
    assert!(provider
        .geocode(&GeocodeQuery::new("LUGAR NENHUM"))
        .await
        .unwrap()
        .is_none());

    assert!(matches!(
        NominatimProvider::new(mock_server.uri(), "  "),
        Err(AppError::Configuration(_))
    ));
}
