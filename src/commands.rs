use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use console::style;
use tracing::{info, warn};

use crate::config::Config;
use crate::embeddings::{Embedder, OllamaClient};
use crate::generation::OllamaGenerator;
use crate::knowledge_base::{BuildReport, KnowledgeBaseBuilder, Manifest, load_records};
use crate::pipeline::{AnswerPipeline, PipelineResult};
use crate::retriever::Retriever;

type OllamaPipeline = AnswerPipeline<OllamaClient, OllamaGenerator>;

/// Build the knowledge base from a FAQ records file and replace the current one
#[inline]
pub async fn build_knowledge_base(config: Config, input: PathBuf) -> Result<BuildReport> {
    tokio::task::spawn_blocking(move || run_build(&config, &input))
        .await
        .context("Build task panicked")?
}

fn run_build(config: &Config, input: &Path) -> Result<BuildReport> {
    let records = load_records(input)?;
    if records.is_empty() {
        warn!("{} contains no records", input.display());
    }

    let embedder = OllamaClient::new(config)?;
    embedder
        .health_check()
        .context("Embedding service is not ready")?;

    let dir = config.knowledge_base_dir();
    info!(
        "Building knowledge base from {} into {}",
        input.display(),
        dir.display()
    );

    let report = KnowledgeBaseBuilder::new(&embedder)
        .with_batch_size(config.embedding.batch_size as usize)
        .with_progress(true)
        .build_and_persist(&records, &dir, Some(input))
        .context("Failed to build knowledge base")?;

    println!(
        "{} Indexed {} documents (dimension {}) in {:.2?}",
        style("✓").green(),
        report.document_count,
        report.dimension,
        report.elapsed
    );
    println!(
        "  Knowledge base: {}",
        style(report.knowledge_base_dir.display()).cyan()
    );

    Ok(report)
}

/// Answer each question against the knowledge base, concurrently, printing in input order
#[inline]
pub async fn ask_questions(config: &Config, questions: Vec<String>, json: bool) -> Result<()> {
    let pipeline = Arc::new(load_pipeline(config)?);

    let handles: Vec<_> = questions
        .into_iter()
        .map(|question| {
            let pipeline = Arc::clone(&pipeline);
            tokio::task::spawn_blocking(move || {
                let result = pipeline.ask(&question);
                (question, result)
            })
        })
        .collect();

    let mut answered = Vec::with_capacity(handles.len());
    for handle in handles {
        let (question, result) = handle.await.context("Question task panicked")?;
        let result = result.with_context(|| format!("Failed to answer {:?}", question))?;
        answered.push((question, result));
    }

    if json {
        let results: Vec<&PipelineResult> = answered.iter().map(|(_, result)| result).collect();
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for (question, result) in &answered {
            print_result(question, result);
        }
    }

    Ok(())
}

fn load_pipeline(config: &Config) -> Result<OllamaPipeline> {
    let embedder = OllamaClient::new(config)?;
    let generator = OllamaGenerator::new(config)?;

    let dir = config.knowledge_base_dir();
    let retriever = Retriever::load(&dir, embedder).with_context(|| {
        format!(
            "No usable knowledge base at {}. Run 'admissions-rag build --input <file>' first.",
            dir.display()
        )
    })?;

    if let Ok(Some(manifest)) = Manifest::load(&dir) {
        warn_on_model_change(&manifest, retriever.embedder());
    }

    let pipeline = AnswerPipeline::new(
        retriever,
        generator,
        &config.retrieval.prompt_template,
        config.retrieval.top_k,
    )?;
    Ok(pipeline)
}

fn warn_on_model_change(manifest: &Manifest, embedder: &impl Embedder) {
    if manifest.embedding_model != embedder.model_name() {
        warn!(
            "Knowledge base was built with embedding model {} but {} is configured; rebuild it",
            manifest.embedding_model,
            embedder.model_name()
        );
    }
}

fn print_result(question: &str, result: &PipelineResult) {
    println!("{} {}", style("Câu hỏi:").bold().cyan(), question);
    println!();

    println!(
        "{}",
        style(format!(
            "Retrieved contexts ({}):",
            result.retrieved_contexts.len()
        ))
        .bold()
        .yellow()
    );
    for (i, (context, distance)) in result
        .retrieved_contexts
        .iter()
        .zip(&result.distances)
        .enumerate()
    {
        println!(
            "{}",
            style(format!("[{}] distance {:.4}", i + 1, distance)).dim()
        );
        println!("{}", context);
    }
    println!();

    println!("{}", style("Prompt:").bold().yellow());
    println!("{}", style(&result.prompt).dim());
    println!();

    println!("{}", style("Trả lời:").bold().green());
    println!("{}", result.answer);
    println!();
}

/// Show what the current knowledge base contains and how it was built
#[inline]
pub fn show_status(config: &Config) -> Result<()> {
    let dir = config.knowledge_base_dir();
    println!("{}", style("📚 Knowledge Base Status").bold().cyan());
    println!("  Location: {}", style(dir.display()).cyan());

    if !dir.exists() {
        println!("  {}", style("Not built yet.").yellow());
        println!("  Use 'admissions-rag build --input <file>' to build it.");
        return Ok(());
    }

    match Manifest::load(&dir) {
        Ok(Some(manifest)) => {
            println!(
                "  Built: {}",
                manifest.built_at.format("%Y-%m-%d %H:%M:%S UTC")
            );
            println!("  Documents: {}", manifest.document_count);
            println!("  Dimension: {}", manifest.dimension);
            println!("  Embedding Model: {}", manifest.embedding_model);
            if let Some(source) = &manifest.source {
                println!("  Source: {}", source.display());
            }
            if manifest.embedding_model != config.embedding.model {
                println!(
                    "  {} configured embedding model is {}, rebuild before asking",
                    style("⚠").yellow(),
                    config.embedding.model
                );
            }
        }
        Ok(None) => println!("  Manifest: {}", style("missing").yellow()),
        Err(e) => println!("  Manifest: {} ({})", style("unreadable").red(), e),
    }

    Ok(())
}

/// Check that Ollama is reachable and both configured models are installed
#[inline]
pub async fn check_services(config: Config) -> Result<()> {
    tokio::task::spawn_blocking(move || run_checks(&config))
        .await
        .context("Check task panicked")?
}

fn run_checks(config: &Config) -> Result<()> {
    let embedder = OllamaClient::new(config)?;
    let generator = OllamaGenerator::new(config)?;
    let mut healthy = true;

    match embedder.health_check() {
        Ok(()) => println!(
            "{} Embedding model {} is available (timeout {}s)",
            style("✓").green(),
            embedder.model(),
            embedder.timeout().as_secs()
        ),
        Err(e) => {
            healthy = false;
            println!("{} Embedding model: {}", style("✗").red(), e);
        }
    }

    match generator.health_check() {
        Ok(()) => println!(
            "{} Generation model {} is available (timeout {}s)",
            style("✓").green(),
            generator.model(),
            generator.timeout().as_secs()
        ),
        Err(e) => {
            healthy = false;
            println!("{} Generation model: {}", style("✗").red(), e);
        }
    }

    anyhow::ensure!(healthy, "Ollama is not ready to serve questions");
    Ok(())
}
