mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use snipbox_sandbox::config::UnknownLanguagePolicy;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "snipbox-cli")]
#[command(about = "Snipbox CLI - Warm images, inspect the catalog, run and submit snippets", long_about = None)]
struct Cli {
    /// JSON image catalog to use instead of the built-in one
    #[arg(long, global = true, env = "IMAGE_CATALOG_PATH")]
    catalog: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull every catalog image that is not present locally
    WarmImages {
        /// Exit non-zero if any image could not be pulled
        #[arg(long, default_value = "false")]
        strict: bool,
    },

    /// List languages, versions and images in the catalog
    Languages,

    /// Run a source file in a sandbox on this machine
    Run {
        /// Source file, or "-" for stdin
        file: PathBuf,

        /// Language name (python, javascript, java, go)
        #[arg(short, long)]
        language: String,

        /// Runtime version (defaults to the language's default)
        #[arg(short, long)]
        version: Option<String>,

        /// Wall-clock timeout in seconds
        #[arg(short, long)]
        timeout: Option<f64>,

        /// What to do with an unknown language
        #[arg(long, default_value = "reject", env = "UNKNOWN_LANGUAGE_POLICY")]
        unknown_language: UnknownLanguagePolicy,

        /// Print the result as JSON
        #[arg(long, default_value = "false")]
        json: bool,
    },

    /// Queue a source file for a worker and wait for its result
    Submit {
        /// Source file, or "-" for stdin
        file: PathBuf,

        /// Language name (python, javascript, java, go)
        #[arg(short, long)]
        language: String,

        /// Runtime version (defaults to the language's default)
        #[arg(short, long)]
        version: Option<String>,

        /// Wall-clock timeout in seconds
        #[arg(short, long)]
        timeout: Option<f64>,

        /// Redis connection URL
        #[arg(long, default_value = "redis://127.0.0.1:6379", env = "REDIS_URL")]
        redis_url: String,

        /// Queue name (without the snipbox:queue prefix)
        #[arg(short, long, default_value = "code_execution", env = "QUEUE_NAME")]
        queue: String,

        /// How long to wait for the result, in seconds
        #[arg(long, default_value = "120")]
        wait: u64,
    },

    /// Force-remove sandbox containers left behind by a crashed process
    Reap,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let catalog = cli.catalog.as_deref();

    let status = match cli.command {
        Commands::WarmImages { strict } => commands::warm_images(catalog, strict).await?,
        Commands::Languages => commands::list_languages(catalog)?,
        Commands::Run {
            file,
            language,
            version,
            timeout,
            unknown_language,
            json,
        } => {
            let request = commands::read_request(&file, &language, version, timeout)?;
            commands::run_local(catalog, request, unknown_language, json).await?
        }
        Commands::Submit {
            file,
            language,
            version,
            timeout,
            redis_url,
            queue,
            wait,
        } => {
            let request = commands::read_request(&file, &language, version, timeout)?;
            commands::submit(&redis_url, &queue, request, wait).await?
        }
        Commands::Reap => commands::reap().await?,
    };

    if status != 0 {
        std::process::exit(status);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_arguments() {
        let cli = Cli::parse_from([
            "snipbox-cli",
            "run",
            "hello.py",
            "--language",
            "python",
            "--version",
            "3.11",
            "--timeout",
            "2.5",
            "--unknown-language",
            "fallback",
        ]);

        match cli.command {
            Commands::Run {
                file,
                language,
                version,
                timeout,
                unknown_language,
                json,
            } => {
                assert_eq!(file, PathBuf::from("hello.py"));
                assert_eq!(language, "python");
                assert_eq!(version.as_deref(), Some("3.11"));
                assert_eq!(timeout, Some(2.5));
                assert_eq!(unknown_language, UnknownLanguagePolicy::Fallback);
                assert!(!json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_warm_images_strict_flag() {
        let cli = Cli::parse_from(["snipbox-cli", "warm-images", "--strict"]);
        assert!(matches!(cli.command, Commands::WarmImages { strict: true }));
    }
}
