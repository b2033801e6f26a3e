//! Command-line argument parsing (§6).

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "captn", about = "A rule-driven update engine for containers on a local engine host", version)]
pub struct Cli {
    /// Run a single update cycle and exit.
    #[arg(short, long)]
    pub run: bool,

    /// Evaluate the cycle without pulling images or recreating containers.
    #[arg(short = 't', long = "dry-run")]
    pub dry_run: bool,

    /// Restrict the cycle to containers matching `name=<glob>` or `status=<state>`.
    /// Unknown filter keys are logged and dropped, not rejected.
    #[arg(short, long = "filter", value_parser = parse_filter)]
    pub filters: Vec<Filter>,

    #[arg(long = "log-level", default_value = "info")]
    pub log_level: String,

    /// Remove rotated log files before starting.
    #[arg(long)]
    pub clear_logs: bool,

    /// Run the cron-driven scheduler loop instead of a single cycle.
    #[arg(short, long)]
    pub daemon: bool,

    #[arg(long, default_value = "./captn.ini")]
    pub config: std::path::PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Name(String),
    Status(String),
    Unknown(String),
}

fn parse_filter(raw: &str) -> Result<Filter, String> {
    match raw.split_once('=') {
        Some(("name", v)) => Ok(Filter::Name(v.to_string())),
        Some(("status", v)) => Ok(Filter::Status(v.to_string())),
        Some((key, _)) => Ok(Filter::Unknown(key.to_string())),
        None => Ok(Filter::Unknown(raw.to_string())),
    }
}

impl Cli {
    pub fn known_filters(&self) -> Vec<&Filter> {
        self.filters
            .iter()
            .filter(|f| {
                if let Filter::Unknown(key) = f {
                    tracing::warn!(key, "unrecognized filter key, dropping");
                    false
                } else {
                    true
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parses_name_and_status_filters() {
        let cli = Cli::parse_from(["captn", "--run", "--filter", "name=web*", "--filter", "status=running"]);
        assert!(cli.run);
        assert_eq!(cli.filters, vec![Filter::Name("web*".to_string()), Filter::Status("running".to_string())]);
    }

    #[test]
    fn unknown_filter_keys_are_kept_but_dropped_on_use() {
        let cli = Cli::parse_from(["captn", "--filter", "bogus=1"]);
        assert_eq!(cli.known_filters().len(), 0);
    }
}
