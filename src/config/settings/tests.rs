use super::*;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.embedding.model, "bge-m3");
    assert_eq!(config.embedding.batch_size, 16);
    assert_eq!(config.generation.temperature, 0.3);
    assert_eq!(config.generation.top_p, 0.9);
    assert_eq!(config.generation.repeat_penalty, 1.15);
    assert_eq!(config.generation.max_tokens, 256);
    assert_eq!(config.retrieval.top_k, 3);
    assert!(config.validate().is_ok());
}

#[test]
fn config_validation() {
    let config = Config::default();

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.batch_size = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.embedding.batch_size = 1001;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.generation.model = "   ".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.generation.top_p = 0.0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.generation.temperature = f32::NAN;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.generation.timeout_seconds = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.retrieval.top_k = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config;
    invalid_config.retrieval.prompt_template = "{context} {unknown} {question}".to_string();
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidPromptTemplate(_))
    ));
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn https_url_generation() {
    let mut config = Config::default();
    config.ollama.protocol = "https".to_string();
    config.ollama.host = "secure.example.com".to_string();
    config.ollama.port = 443;

    let url = config
        .ollama_url()
        .expect("should generate https url successfully");
    assert_eq!(url.as_str(), "https://secure.example.com/");
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let partial = r#"
        [ollama]
        host = "gpu-box"

        [retrieval]
        top_k = 5
    "#;

    let config: Config = toml::from_str(partial).expect("should parse partial toml");
    assert_eq!(config.ollama.host, "gpu-box");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.retrieval.top_k, 5);
    assert_eq!(config.retrieval.prompt_template, DEFAULT_PROMPT_TEMPLATE);
    assert_eq!(config.embedding, EmbeddingConfig::default());
}

#[test]
fn setter_validation() {
    let mut ollama = OllamaConfig::default();
    assert!(ollama.set_protocol("https".to_string()).is_ok());
    assert!(ollama.set_host("example.com".to_string()).is_ok());
    assert!(ollama.set_port(8080).is_ok());

    assert!(ollama.set_protocol("ftp".to_string()).is_err());
    assert!(ollama.set_protocol("HTTP".to_string()).is_err());
    assert!(ollama.set_port(0).is_err());

    let mut embedding = EmbeddingConfig::default();
    assert!(embedding.set_model("nomic-embed-text".to_string()).is_ok());
    assert!(embedding.set_batch_size(128).is_ok());
    assert!(embedding.set_model(String::new()).is_err());
    assert!(embedding.set_batch_size(0).is_err());
    assert!(embedding.set_batch_size(1001).is_err());

    let mut generation = GenerationConfig::default();
    assert!(generation.set_temperature(0.0).is_ok());
    assert!(generation.set_temperature(2.5).is_err());
    assert!(generation.set_model("llama3.1:8b".to_string()).is_ok());

    let mut retrieval = RetrievalConfig::default();
    assert!(retrieval.set_top_k(10).is_ok());
    assert!(retrieval.set_top_k(0).is_err());
    assert_eq!(retrieval.top_k, 10);
}

#[test]
fn load_missing_config_returns_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let config = Config::load(temp_dir.path()).expect("should load defaults");
    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert_eq!(config.ollama, OllamaConfig::default());
    assert_eq!(config.retrieval.top_k, DEFAULT_TOP_K);
}

#[test]
fn save_then_load() {
    let temp_dir = TempDir::new().expect("should create temp dir");

    let mut config = Config {
        base_dir: temp_dir.path().join("nested"),
        ..Config::default()
    };
    config.generation.model = "llama3.1:8b".to_string();
    config.retrieval.top_k = 4;
    config.retrieval.knowledge_base_dir = Some(PathBuf::from("kb"));
    config.save().expect("should save config");

    let loaded = Config::load(temp_dir.path().join("nested")).expect("should load config");
    assert_eq!(loaded, config);
}

#[test]
fn load_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[retrieval]\ntop_k = 0\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}

#[test]
fn knowledge_base_dir_resolution() {
    let mut config = Config {
        base_dir: PathBuf::from("/srv/rag"),
        ..Config::default()
    };
    assert_eq!(
        config.knowledge_base_dir(),
        PathBuf::from("/srv/rag/knowledge_base")
    );

    config.retrieval.knowledge_base_dir = Some(PathBuf::from("faq"));
    assert_eq!(config.knowledge_base_dir(), PathBuf::from("/srv/rag/faq"));

    config.retrieval.knowledge_base_dir = Some(PathBuf::from("/data/faq"));
    assert_eq!(config.knowledge_base_dir(), PathBuf::from("/data/faq"));
}
