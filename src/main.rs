use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use utterance_loader::{
    KeyStrategy, LoadConfig, LocalConnector, Orchestrator, RetryConfig, TailPolicy,
    parse_grouping_id,
};

/// Load sharded utterance CSV files into the Utterance table.
#[derive(Parser, Debug)]
#[command(name = "utterance-loader")]
#[command(version)]
struct Cli {
    /// Database to load into (a directory for the bundled local backend)
    database: String,
    /// Directory holding utterance-NNNNNNNNNNNN.csv shards
    input_dir: PathBuf,
    /// Number of shards to load, starting at index 0
    #[arg(value_parser = parse_file_count)]
    file_count: u64,

    /// Rows per write transaction
    #[arg(long, default_value_t = utterance_loader::DEFAULT_BATCH_SIZE)]
    batch_size: usize,
    /// Per-file deadline in seconds
    #[arg(long, default_value_t = utterance_loader::DEFAULT_TIMEOUT.as_secs())]
    timeout_secs: u64,
    /// Maximum number of files loaded at once (default: all)
    #[arg(long)]
    max_workers: Option<usize>,
    /// Discard the last partial batch of each file instead of writing it
    #[arg(long)]
    drop_partial_tail: bool,
    /// Derive keys from a running digest (legacy key layout)
    #[arg(long)]
    cumulative_keys: bool,
    /// Attempts per batch for transient database errors
    #[arg(long, default_value_t = 1)]
    retries: u32,
    /// Write run metrics as JSON to this path
    #[arg(long)]
    metrics_out: Option<PathBuf>,
}

fn parse_file_count(raw: &str) -> Result<u64, String> {
    let n = parse_grouping_id(raw).map_err(|_| format!("file count {raw:?} is not an integer"))?;
    u64::try_from(n).map_err(|_| format!("file count {raw:?} is negative"))
}

impl Cli {
    fn config(&self) -> LoadConfig {
        let mut cfg = LoadConfig::new(&self.database, &self.input_dir, self.file_count)
            .with_batch_size(self.batch_size)
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_retry(RetryConfig::default().with_max_attempts(self.retries));
        if let Some(n) = self.max_workers {
            cfg = cfg.with_max_workers(n);
        }
        if self.drop_partial_tail {
            cfg = cfg.with_tail_policy(TailPolicy::Drop);
        }
        if self.cumulative_keys {
            cfg = cfg.with_key_strategy(KeyStrategy::Cumulative);
        }
        cfg
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = cli.config();
    if let Err(err) = config.validate() {
        eprintln!("error: {err}");
        return ExitCode::from(2);
    }

    let orchestrator = Orchestrator::new(config, LocalConnector);
    let report = match orchestrator.run() {
        Ok(report) => report,
        Err(err) => {
            let chain = format!("{err:#}");
            tracing::error!(error = %chain, "load could not start");
            return ExitCode::FAILURE;
        }
    };

    for file in report.failed() {
        tracing::warn!(path = %file.task.path.display(), "file did not complete");
    }
    if let Some(path) = &cli.metrics_out
        && let Err(err) = orchestrator.metrics().save_to_file(path)
    {
        tracing::warn!(error = %err, "could not save metrics");
    }
    println!("finish !");
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_positionals_are_required() {
        let err = Cli::try_parse_from(["utterance-loader", "db", "/in"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        let err = Cli::try_parse_from(["utterance-loader", "db", "/in", "3", "extra"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn file_count_must_be_an_integer() {
        let err = Cli::try_parse_from(["utterance-loader", "db", "/in", "three"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        let err = Cli::try_parse_from(["utterance-loader", "db", "/in", "-1"]).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        let cli = Cli::try_parse_from(["utterance-loader", "db", "/in", "0x10"]).unwrap();
        assert_eq!(cli.file_count, 16);
    }

    #[test]
    fn flags_map_onto_config() {
        let cli = Cli::try_parse_from([
            "utterance-loader",
            "db",
            "/in",
            "4",
            "--batch-size",
            "250",
            "--max-workers",
            "2",
            "--drop-partial-tail",
            "--retries",
            "3",
        ])
        .unwrap();
        let cfg = cli.config();
        assert_eq!(cfg.database, "db");
        assert_eq!(cfg.file_count, 4);
        assert_eq!(cfg.batch_size, 250);
        assert_eq!(cfg.max_workers, Some(2));
        assert_eq!(cfg.tail_policy, TailPolicy::Drop);
        assert_eq!(cfg.key_strategy, KeyStrategy::Independent);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.timeout, utterance_loader::DEFAULT_TIMEOUT);
    }
}
