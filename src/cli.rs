//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use imageloader_core::{CachePolicy, Priority};

/// Fetch, cache and decode remote images.
///
/// URLs are read from the arguments or, when none are given, from stdin one
/// per line. Duplicate URLs share a single download.
#[derive(Parser, Debug)]
#[command(name = "imageloader")]
#[command(author, version, about)]
pub struct Args {
    /// Image URLs to load
    pub urls: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Maximum concurrent downloads (1-100) [default: 10]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Priority for every request (very_low, low, normal, high, very_high)
    #[arg(long, default_value_t = Priority::Normal)]
    pub priority: Priority,

    /// Cache policy (use_protocol, reload_ignoring_local, reload_ignoring_all,
    /// cache_else_load, cache_only, revalidate)
    #[arg(long, default_value_t = CachePolicy::UseProtocolCachePolicy)]
    pub cache_policy: CachePolicy,

    /// Per-request timeout in seconds (1-3600) [default: 60]
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout: Option<u64>,

    /// Directory for the disk cache [default: user cache dir]
    #[arg(long, conflicts_with = "no_cache")]
    pub cache_dir: Option<PathBuf>,

    /// Do not read or write any cache
    #[arg(long)]
    pub no_cache: bool,

    /// Config file to use instead of the default location
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print a JSON summary instead of one line per URL
    #[arg(long)]
    pub json: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["imageloader"]).unwrap();
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(args.urls.is_empty());
        assert_eq!(args.concurrency, None);
        assert_eq!(args.priority, Priority::Normal);
        assert_eq!(args.cache_policy, CachePolicy::UseProtocolCachePolicy);
        assert_eq!(args.timeout, None);
        assert!(!args.no_cache);
        assert!(!args.json);
    }

    #[test]
    fn test_cli_positional_urls() {
        let args = Args::try_parse_from([
            "imageloader",
            "https://example.com/a.png",
            "https://example.com/b.png",
        ])
        .unwrap();
        assert_eq!(args.urls.len(), 2);
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["imageloader", "-vv"]).unwrap();
        assert_eq!(args.verbose, 2);

        let args = Args::try_parse_from(["imageloader", "--verbose"]).unwrap();
        assert_eq!(args.verbose, 1);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["imageloader", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let err = Args::try_parse_from(["imageloader", "--invalid-flag"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }

    // ==================== Concurrency Tests ====================

    #[test]
    fn test_cli_concurrency_bounds() {
        let args = Args::try_parse_from(["imageloader", "-c", "1"]).unwrap();
        assert_eq!(args.concurrency, Some(1));
        let args = Args::try_parse_from(["imageloader", "--concurrency", "100"]).unwrap();
        assert_eq!(args.concurrency, Some(100));
    }

    #[test]
    fn test_cli_concurrency_zero_rejected() {
        let err = Args::try_parse_from(["imageloader", "-c", "0"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_concurrency_over_max_rejected() {
        let err = Args::try_parse_from(["imageloader", "-c", "101"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    // ==================== Request Option Tests ====================

    #[test]
    fn test_cli_priority_and_policy_labels() {
        let args = Args::try_parse_from([
            "imageloader",
            "--priority",
            "very_high",
            "--cache-policy",
            "cache_only",
        ])
        .unwrap();
        assert_eq!(args.priority, Priority::VeryHigh);
        assert_eq!(args.cache_policy, CachePolicy::ReturnCacheDataDontLoad);
    }

    #[test]
    fn test_cli_unknown_priority_rejected() {
        let err = Args::try_parse_from(["imageloader", "--priority", "urgent"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn test_cli_timeout_range() {
        let args = Args::try_parse_from(["imageloader", "--timeout", "3600"]).unwrap();
        assert_eq!(args.timeout, Some(3600));
        assert!(Args::try_parse_from(["imageloader", "--timeout", "0"]).is_err());
    }

    #[test]
    fn test_cli_cache_dir_conflicts_with_no_cache() {
        let err = Args::try_parse_from(["imageloader", "--no-cache", "--cache-dir", "/tmp/x"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }
}
