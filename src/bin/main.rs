use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use llm_benchmark_pro::{
    find_results_files, load_config_from_file, load_results_csv, print_results, print_summary,
    run_pipeline, save_summary_to_file, EvaluationOutcome, DEFAULT_CONFIG_PATH,
};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "llm-benchmark-pro")]
#[command(about = "Benchmark latency, throughput, cost and quality across LLM providers")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to the YAML benchmark configuration
    #[arg(long, env = "LLM_BENCH_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Directory the results CSV is written to
    #[arg(long, env = "LLM_BENCH_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Enable verbose logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the benchmark described by --config (default behavior)
    Run,
    /// Summarise saved results files
    Summary {
        /// Results CSV to summarise (default: every results_*.csv in --dir)
        file: Option<PathBuf>,

        /// Directory searched for results files
        #[arg(long, default_value = ".")]
        dir: PathBuf,

        /// Also write the summary to this file
        #[arg(long)]
        save: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Provider keys may live in a local .env; its absence is fine
    let _ = dotenvy::dotenv();

    // RUST_LOG wins, then --verbose, then warn
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if args.verbose {
            "debug".to_string()
        } else {
            "warn".to_string()
        }
    });
    tracing_subscriber::fmt().with_env_filter(&filter).init();

    match &args.command {
        Some(Commands::Summary { file, dir, save }) => {
            run_summary_command(file.clone(), dir.clone(), save.clone())
        }
        Some(Commands::Run) | None => run_benchmark_command(&args).await,
    }
}

async fn run_benchmark_command(args: &Args) -> Result<()> {
    let config = load_config_from_file(&args.config)?;

    println!("Starting benchmark: {}", config.benchmark_name);
    println!("Models to test: {:?}", config.models);

    let output = run_pipeline(&config, &args.output_dir).await?;

    if let EvaluationOutcome::Degraded { reason, .. } = &output.evaluation {
        println!("Quality scores are synthetic ({})", reason);
    }

    print_results(output.evaluation.table());
    println!("\nReport saved to {}", output.report_path.display());

    Ok(())
}

fn run_summary_command(
    file: Option<PathBuf>,
    dir: PathBuf,
    save: Option<PathBuf>,
) -> Result<()> {
    let files = match file {
        Some(f) => vec![f],
        None => find_results_files(&dir)?,
    };
    if files.is_empty() {
        return Err(anyhow!(
            "No benchmark results found in {}. Run a benchmark first.",
            dir.display()
        ));
    }

    let mut tables = Vec::new();
    for path in files {
        info!("Loading results from: {}", path.display());
        let table = load_results_csv(&path)?;
        if table.is_empty() {
            warn!("{} has no rows", path.display());
        }
        let title = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        print_summary(&title, &table)?;
        tables.push((title, table));
    }

    if let Some(save) = save {
        save_summary_to_file(&tables, &save)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_from_env() {
        std::env::set_var("LLM_BENCH_CONFIG", "config/from_env.yaml");
        let args = Args::try_parse_from(["llm-benchmark-pro"]).unwrap();
        assert_eq!(args.config, PathBuf::from("config/from_env.yaml"));

        let args =
            Args::try_parse_from(["llm-benchmark-pro", "--config", "explicit.yaml"]).unwrap();
        assert_eq!(args.config, PathBuf::from("explicit.yaml"));
        std::env::remove_var("LLM_BENCH_CONFIG");
    }

    #[test]
    fn test_summary_subcommand() {
        let args = Args::try_parse_from(["llm-benchmark-pro", "summary", "--dir", "out"]).unwrap();
        match args.command {
            Some(Commands::Summary { file, dir, save }) => {
                assert!(file.is_none());
                assert_eq!(dir, PathBuf::from("out"));
                assert!(save.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
