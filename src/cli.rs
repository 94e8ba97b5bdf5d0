//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Concurrently crawl paste sites, match their content against regexes, and
/// alert or archive the hits.
#[derive(Parser, Debug)]
#[command(name = "pystemon")]
#[command(author, version, about)]
pub struct Args {
    /// Path to the YAML configuration file.
    ///
    /// When absent, tried in order: `/etc/pystemon.yaml`, `./pystemon.yaml`.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Enable verbose debug logging.
    #[arg(long)]
    pub debug: bool,

    /// Parse and validate the configuration, print a summary, and exit
    /// without starting any pollers.
    #[arg(long)]
    pub check: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["pystemon"]).unwrap();
        assert!(args.config.is_none());
        assert!(!args.debug);
        assert!(!args.check);
    }

    #[test]
    fn test_cli_config_short_and_long_flag() {
        let args = Args::try_parse_from(["pystemon", "-c", "custom.yaml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("custom.yaml")));

        let args = Args::try_parse_from(["pystemon", "--config", "custom.yaml"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("custom.yaml")));
    }

    #[test]
    fn test_cli_debug_flag() {
        let args = Args::try_parse_from(["pystemon", "--debug"]).unwrap();
        assert!(args.debug);
    }

    #[test]
    fn test_cli_check_flag() {
        let args = Args::try_parse_from(["pystemon", "--check"]).unwrap();
        assert!(args.check);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let result = Args::try_parse_from(["pystemon", "--help"]);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_cli_version_flag_shows_version() {
        let result = Args::try_parse_from(["pystemon", "--version"]);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_invalid_flag_returns_error() {
        let result = Args::try_parse_from(["pystemon", "--invalid-flag"]);
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind(), clap::error::ErrorKind::UnknownArgument);
    }
}
