use clap::{Args, Parser, Subcommand, ValueEnum};
use linkvault_core::ShortCode;
use linkvault_deleter::BatchSettings;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub const STORAGE_BACKEND_ENV: &str = "LINKVAULT_STORAGE_BACKEND";
pub const MYSQL_DSN_ENV: &str = "LINKVAULT_MYSQL_DSN";
pub const BASE_URL_ENV: &str = "LINKVAULT_BASE_URL";
pub const LOG_FORMAT_ENV: &str = "LINKVAULT_LOG_FORMAT";
pub const QUEUE_CAPACITY_ENV: &str = "LINKVAULT_QUEUE_CAPACITY";
pub const FLUSH_THRESHOLD_ENV: &str = "LINKVAULT_FLUSH_THRESHOLD";
pub const FLUSH_INTERVAL_SECS_ENV: &str = "LINKVAULT_FLUSH_INTERVAL_SECS";
pub const DISPATCHERS_ENV: &str = "LINKVAULT_DISPATCHERS";

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StorageBackendArg {
    #[value(name = "in-memory")]
    InMemory,
    #[value(name = "mysql")]
    Mysql,
}

impl Display for StorageBackendArg {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackendArg::InMemory => write!(f, "in-memory"),
            StorageBackendArg::Mysql => write!(f, "mysql"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "linkvault", about = "Manage shortened links")]
pub struct CLI {
    #[arg(
        long,
        global = true,
        env = STORAGE_BACKEND_ENV,
        value_enum,
        default_value_t = StorageBackendArg::InMemory
    )]
    pub storage: StorageBackendArg,

    #[arg(long, global = true, env = MYSQL_DSN_ENV, required_if_eq("storage", "mysql"))]
    pub mysql_dsn: Option<String>,

    #[arg(long, global = true, env = BASE_URL_ENV, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    #[arg(
        long,
        global = true,
        env = LOG_FORMAT_ENV,
        value_enum,
        default_value_t = LogFormatArg::Pretty
    )]
    pub log_format: LogFormatArg,

    #[command(flatten)]
    pub batch: BatchArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Deletion pipeline knobs; unset values fall back to the library defaults.
#[derive(Debug, Args)]
pub struct BatchArgs {
    #[arg(long, global = true, env = QUEUE_CAPACITY_ENV)]
    pub queue_capacity: Option<usize>,

    #[arg(long, global = true, env = FLUSH_THRESHOLD_ENV)]
    pub flush_threshold: Option<usize>,

    #[arg(long, global = true, env = FLUSH_INTERVAL_SECS_ENV)]
    pub flush_interval_secs: Option<u64>,

    #[arg(long, global = true, env = DISPATCHERS_ENV)]
    pub dispatchers: Option<usize>,
}

impl BatchArgs {
    pub fn settings(&self) -> BatchSettings {
        let defaults = BatchSettings::default();
        BatchSettings::builder()
            .queue_capacity(self.queue_capacity.unwrap_or(defaults.queue_capacity))
            .flush_threshold(self.flush_threshold.unwrap_or(defaults.flush_threshold))
            .flush_interval(
                self.flush_interval_secs
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.flush_interval),
            )
            .dispatchers(self.dispatchers.unwrap_or(defaults.dispatchers))
            .build()
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Shorten one or more URLs for an owner.
    Shorten {
        #[arg(long)]
        owner: String,
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Print the target of a short code.
    Resolve {
        #[arg(value_parser = parse_code)]
        code: ShortCode,
    },
    /// List the live links of an owner.
    List {
        #[arg(long)]
        owner: String,
    },
    /// Delete links of an owner through the deletion pipeline.
    Delete {
        #[arg(long)]
        owner: String,
        #[arg(required = true, value_parser = parse_code)]
        codes: Vec<ShortCode>,
    },
    /// Print record and owner counts.
    Stats,
    /// Check that the storage backend is reachable.
    Ping,
}

fn parse_code(raw: &str) -> Result<ShortCode, String> {
    ShortCode::parse(raw).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delete_requires_owner_and_codes() {
        assert!(CLI::try_parse_from(["linkvault", "delete", "--owner", "u1"]).is_err());
        assert!(CLI::try_parse_from(["linkvault", "delete", "abc"]).is_err());

        let cli =
            CLI::try_parse_from(["linkvault", "delete", "--owner", "u1", "abc", "def"]).unwrap();
        let Command::Delete { owner, codes } = cli.command else {
            panic!("expected delete");
        };
        assert_eq!(owner, "u1");
        assert_eq!(codes.len(), 2);
    }

    #[test]
    fn malformed_code_is_rejected() {
        assert!(CLI::try_parse_from(["linkvault", "resolve", "not a code"]).is_err());
    }

    #[test]
    fn mysql_backend_requires_dsn() {
        let parsed = CLI::try_parse_from(["linkvault", "--storage", "mysql", "stats"]);
        if std::env::var_os(MYSQL_DSN_ENV).is_none() {
            assert!(parsed.is_err());
        }
    }

    #[test]
    fn batch_flags_override_defaults() {
        let cli = CLI::try_parse_from([
            "linkvault",
            "--flush-threshold",
            "5",
            "--flush-interval-secs",
            "2",
            "ping",
        ])
        .unwrap();

        let settings = cli.batch.settings();
        if std::env::var_os(QUEUE_CAPACITY_ENV).is_none() {
            assert_eq!(settings.queue_capacity, 50);
        }
        assert_eq!(settings.flush_threshold, 5);
        assert_eq!(settings.flush_interval, Duration::from_secs(2));
    }
}
