use super::*;
use crate::config::OllamaConfig;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> OllamaClient {
    let base_url = Url::parse(&server.uri()).expect("mock server uri is a valid url");
    OllamaClient::with_base_url(base_url, "bge-m3".to_string(), Duration::from_secs(5))
        .with_backoff_unit(Duration::from_millis(1))
}

#[test]
fn client_configuration() {
    let mut config = Config::default();
    config.ollama = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
    };
    config.embedding.model = "test-model".to_string();

    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model(), "test-model");
    assert_eq!(client.model_name(), "test-model");
    assert_eq!(client.transport.base_url().host_str(), Some("test-host"));
    assert_eq!(client.transport.base_url().port(), Some(1234));
    assert_eq!(client.transport.retry_attempts(), DEFAULT_RETRY_ATTEMPTS);
}

#[test]
fn client_builder_methods() {
    let client = OllamaClient::new(&Config::default())
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60))
        .with_retry_attempts(5);

    assert_eq!(client.transport.retry_attempts(), 5);
    assert_eq!(client.timeout(), Duration::from_secs(60));
}

#[test]
fn empty_input_makes_no_request() {
    // Nothing listens on this port; an HTTP call would fail
    let base_url = Url::parse("http://127.0.0.1:9").expect("valid url");
    let client = OllamaClient::with_base_url(base_url, "m".to_string(), Duration::from_secs(1));

    let vectors = client.embed(&[]).expect("empty input should succeed");
    assert!(vectors.is_empty());
}

#[test]
fn model_lookup_accepts_implicit_latest_tag() {
    let models = vec![ModelInfo {
        name: "bge-m3:latest".to_string(),
    }];

    assert!(ensure_model_available(&models, "bge-m3").is_ok());
    assert!(ensure_model_available(&models, "bge-m3:latest").is_ok());
    assert!(ensure_model_available(&models, "nomic-embed-text").is_err());
}

#[tokio::test]
async fn embed_batch_preserves_order() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_partial_json(serde_json::json!({
            "model": "bge-m3",
            "input": ["first", "second"]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "bge-m3",
            "embeddings": [[1.0, 0.0], [0.0, 1.0]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let vectors = client
        .embed(&["first".to_string(), "second".to_string()])
        .expect("embedding should succeed");

    assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
}

#[tokio::test]
async fn embed_one_returns_single_vector() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embeddings": [[0.25, 0.5, 0.75]]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let vector = client.embed_one("xin chào").expect("embedding should succeed");
    assert_eq!(vector, vec![0.25, 0.5, 0.75]);
}

#[tokio::test]
async fn count_mismatch_is_service_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embeddings": [[1.0, 0.0]]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client.embed(&["a".to_string(), "b".to_string()]);
    assert!(matches!(result, Err(RagError::EmbeddingService(_))));
}

#[tokio::test]
async fn server_failure_is_service_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server).with_retry_attempts(2);
    let result = client.embed(&["a".to_string()]);
    assert!(matches!(result, Err(RagError::EmbeddingService(_))));
}

#[tokio::test]
async fn health_check_requires_configured_model() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [{"name": "bge-m3:latest", "size": 1_200_000_000_u64}]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(client.health_check().is_ok());

    let missing = OllamaClient::with_base_url(
        Url::parse(&server.uri()).expect("valid url"),
        "nomic-embed-text".to_string(),
        Duration::from_secs(5),
    );
    assert!(matches!(missing.health_check(), Err(RagError::Config(_))));
}
