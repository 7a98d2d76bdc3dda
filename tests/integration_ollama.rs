#![expect(
    clippy::tests_outside_test_module,
    reason = "integration tests are only compiled in test mode"
)]

// End-to-end tests against a mocked Ollama HTTP API
// The mock server runs on its own thread, so the blocking clients can call it
// from inside async tests.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Value, json};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use admissions_rag::RagError;
use admissions_rag::config::{Config, OllamaConfig};
use admissions_rag::embeddings::OllamaClient;
use admissions_rag::generation::OllamaGenerator;
use admissions_rag::knowledge_base::{KnowledgeBaseBuilder, RawRecord};
use admissions_rag::pipeline::AnswerPipeline;
use admissions_rag::retriever::Retriever;

/// Embeds each input as `[length in chars, count of 'h']`, mimicking `/api/embed`
struct LengthEmbeddings;

impl Respond for LengthEmbeddings {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let Ok(body) = request.body_json::<Value>() else {
            return ResponseTemplate::new(400);
        };
        let embeddings: Vec<Vec<f32>> = body["input"]
            .as_array()
            .map(|inputs| {
                inputs
                    .iter()
                    .filter_map(Value::as_str)
                    .map(|text| {
                        vec![
                            text.chars().count() as f32,
                            text.matches('h').count() as f32,
                        ]
                    })
                    .collect()
            })
            .unwrap_or_default();
        ResponseTemplate::new(200).set_body_json(json!({ "embeddings": embeddings }))
    }
}

fn init_test_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init()
        .ok();
}

fn config_for(server: &MockServer, base_dir: PathBuf) -> Config {
    let mut config = Config {
        ollama: OllamaConfig {
            protocol: "http".to_string(),
            host: server.address().ip().to_string(),
            port: server.address().port(),
        },
        base_dir,
        ..Config::default()
    };
    config.embedding.model = "bge-m3".to_string();
    config.generation.model = "qwen2.5:7b-instruct".to_string();
    config.retrieval.top_k = 2;
    config
}

async fn mount_ollama(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "models": [
                {"name": "bge-m3:latest", "size": 1_200_000_000_u64},
                {"name": "qwen2.5:7b-instruct"}
            ]
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(LengthEmbeddings)
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "model": "qwen2.5:7b-instruct",
            "response": "  Kỳ thi diễn ra vào tháng 7.  ",
            "done": true
        })))
        .mount(server)
        .await;
}

fn records() -> Vec<RawRecord> {
    vec![
        RawRecord::new("Khi nào thi?", "Tháng 7."),
        RawRecord::new(
            "Trường có những ngành đào tạo nào?",
            "Trường có nhiều ngành kỹ thuật và công nghệ.",
        ),
        RawRecord::new(
            "Học phí một năm khoảng bao nhiêu?",
            "Khoảng 30 triệu đồng.",
        ),
    ]
}

#[tokio::test]
async fn build_and_ask_through_ollama() {
    init_test_tracing();
    let server = MockServer::start().await;
    mount_ollama(&server).await;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = config_for(&server, temp_dir.path().to_path_buf());

    let embedder = OllamaClient::new(&config).expect("should create embedder");
    embedder.health_check().expect("embedding model should be found");

    let kb_dir = config.knowledge_base_dir();
    let report = KnowledgeBaseBuilder::new(&embedder)
        .with_batch_size(2)
        .build_and_persist(&records(), &kb_dir, None)
        .expect("should build");
    assert_eq!(report.document_count, 3);
    assert_eq!(report.dimension, 2);

    let generator = OllamaGenerator::new(&config).expect("should create generator");
    generator
        .health_check()
        .expect("generation model should be found");

    let retriever = Retriever::load(&kb_dir, embedder).expect("should load");
    let pipeline = AnswerPipeline::new(
        retriever,
        generator,
        &config.retrieval.prompt_template,
        config.retrieval.top_k,
    )
    .expect("should create pipeline");

    let result = pipeline.ask("Khi nào thi?").expect("should answer");
    assert_eq!(result.answer, "Kỳ thi diễn ra vào tháng 7.");
    assert_eq!(result.retrieved_contexts.len(), 2);
    assert_eq!(
        result.retrieved_contexts[0],
        "Hỏi: Khi nào thi?\nĐáp: Tháng 7."
    );

    let requests = server
        .received_requests()
        .await
        .expect("request recording is enabled");
    let generate_request = requests
        .iter()
        .find(|request| request.url.path() == "/api/generate")
        .expect("generation should have been requested");
    let body: Value = generate_request.body_json().expect("body should be json");
    assert_eq!(body["prompt"], result.prompt);
    assert_eq!(body["stream"], false);
    assert_eq!(body["options"]["num_predict"], 256);
}

#[tokio::test]
async fn generation_outage_is_a_generation_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(LengthEmbeddings)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = config_for(&server, temp_dir.path().to_path_buf());
    let embedder = OllamaClient::new(&config).expect("should create embedder");

    let kb_dir = config.knowledge_base_dir();
    KnowledgeBaseBuilder::new(&embedder)
        .build_and_persist(&records(), &kb_dir, None)
        .expect("should build");

    let pipeline = AnswerPipeline::new(
        Retriever::load(&kb_dir, embedder).expect("should load"),
        OllamaGenerator::new(&config).expect("should create generator"),
        "{context}\n{question}",
        1,
    )
    .expect("should create pipeline");

    assert!(matches!(
        pipeline.ask("Học phí?"),
        Err(RagError::GenerationService(_))
    ));
}

#[tokio::test]
async fn embedding_outage_aborts_build() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = config_for(&server, temp_dir.path().to_path_buf());
    let embedder = OllamaClient::new(&config)
        .expect("should create embedder")
        .with_backoff_unit(Duration::from_millis(1));

    let kb_dir = config.knowledge_base_dir();
    let result = KnowledgeBaseBuilder::new(&embedder).build_and_persist(&records(), &kb_dir, None);

    assert!(matches!(result, Err(RagError::EmbeddingService(_))));
    assert!(!kb_dir.exists());
}
