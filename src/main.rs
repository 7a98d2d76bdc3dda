use std::path::PathBuf;

use admissions_rag::Result;
use admissions_rag::commands::{ask_questions, build_knowledge_base, check_services, show_status};
use admissions_rag::config::{Config, resolve_config_dir, run_interactive_config, show_config};
use anyhow::Context;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "admissions-rag")]
#[command(about = "Answer university admissions questions from an FAQ knowledge base")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml and the knowledge base
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama connection, models and retrieval settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Build the knowledge base from a JSON, JSON Lines, CSV or Excel file of question/answer records
    Build {
        /// Path to the FAQ records
        #[arg(long)]
        input: PathBuf,
    },
    /// Answer one or more questions
    Ask {
        /// Questions to answer
        #[arg(required = true)]
        questions: Vec<String>,
        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the state of the knowledge base
    Status,
    /// Check that Ollama and the configured models are available
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_dir = resolve_config_dir(cli.config_dir).context("Failed to resolve config dir")?;

    match cli.command {
        Commands::Config { show } => {
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Build { input } => {
            build_knowledge_base(Config::load(&config_dir)?, input).await?;
        }
        Commands::Ask { questions, json } => {
            ask_questions(&Config::load(&config_dir)?, questions, json).await?;
        }
        Commands::Status => {
            show_status(&Config::load(&config_dir)?)?;
        }
        Commands::Check => {
            check_services(Config::load(&config_dir)?).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn status_command() {
        let cli = Cli::try_parse_from(["admissions-rag", "status"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Status));
            assert_eq!(parsed.config_dir, None);
        }
    }

    #[test]
    fn build_requires_input() {
        let cli = Cli::try_parse_from(["admissions-rag", "build"]);
        assert!(cli.is_err());

        let cli = Cli::try_parse_from(["admissions-rag", "build", "--input", "faq.json"]);
        if let Ok(parsed) = cli {
            if let Commands::Build { input } = parsed.command {
                assert_eq!(input, PathBuf::from("faq.json"));
            } else {
                panic!("expected build command");
            }
        } else {
            panic!("build with input should parse");
        }
    }

    #[test]
    fn ask_collects_questions() {
        let cli = Cli::try_parse_from([
            "admissions-rag",
            "ask",
            "Khi nào thi?",
            "Học phí bao nhiêu?",
            "--json",
        ]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Ask { questions, json } = parsed.command {
                assert_eq!(questions, vec!["Khi nào thi?", "Học phí bao nhiêu?"]);
                assert!(json);
            }
        }
    }

    #[test]
    fn ask_requires_a_question() {
        let cli = Cli::try_parse_from(["admissions-rag", "ask"]);
        assert!(cli.is_err());
    }

    #[test]
    fn config_dir_is_global() {
        let cli = Cli::try_parse_from(["admissions-rag", "check", "--config-dir", "/tmp/rag"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            assert!(matches!(parsed.command, Commands::Check));
            assert_eq!(parsed.config_dir, Some(PathBuf::from("/tmp/rag")));
        }
    }

    #[test]
    fn config_show_flag() {
        let cli = Cli::try_parse_from(["admissions-rag", "config", "--show"]);
        assert!(cli.is_ok());

        if let Ok(parsed) = cli {
            if let Commands::Config { show } = parsed.command {
                assert!(show);
            }
        }
    }

    #[test]
    fn invalid_command() {
        let cli = Cli::try_parse_from(["admissions-rag", "invalid"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
        }
    }

    #[test]
    fn help_message() {
        let cli = Cli::try_parse_from(["admissions-rag", "--help"]);
        assert!(cli.is_err());

        if let Err(err) = cli {
            assert_eq!(err.kind(), ErrorKind::DisplayHelp);
        }
    }
}
