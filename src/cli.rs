//! CLI argument parsing for lineprof

use clap::{Parser, ValueEnum};

/// Output format for collected profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Annotated source listing (default)
    Text,
    /// Callgrind-format profile for kcachegrind and friends
    Callgrind,
    /// Callgrind profile plus referenced sources in one zip archive
    #[value(name = "callgrindzip")]
    CallgrindZip,
}

#[derive(Parser, Debug)]
#[command(name = "lineprof")]
#[command(version)]
#[command(
    about = "Line-granularity deterministic and statistical wall-clock profiler",
    long_about = None
)]
pub struct Cli {
    /// Write output to this file instead of stdout
    #[arg(short = 'o', long = "out", value_name = "PATH", default_value = "-")]
    pub out: String,

    /// Output format. If not set, auto-detected from the output file name,
    /// falling back to text
    #[arg(short = 'f', long = "format", value_enum)]
    pub format: Option<OutputFormat>,

    /// If non-zero, profile threads spawned by the program too
    #[arg(short = 't', long = "threads", value_name = "0|1", default_value_t = 1)]
    pub threads: u8,

    /// Sample stacks at this period in seconds instead of tracing every
    /// line deterministically (0 = deterministic)
    #[arg(short = 's', long = "statistic", value_name = "SECONDS", default_value_t = 0.0)]
    pub statistic: f64,

    /// Only report files whose path starts with this prefix (repeatable)
    #[arg(long = "include", value_name = "PREFIX")]
    pub include: Vec<String>,

    /// Skip files whose path starts with this prefix (repeatable)
    #[arg(long = "exclude", value_name = "PREFIX")]
    pub exclude: Vec<String>,

    /// Skip everything under the host runtime's library directories
    #[arg(long = "exclude-syspath")]
    pub exclude_syspath: bool,

    /// Run a named module instead of a trace file path
    #[arg(short = 'm', value_name = "MODULE")]
    pub module: Option<String>,

    /// Also write an archive of all involved source files
    #[arg(short = 'z', long = "zipfile", value_name = "PATH")]
    pub zipfile: Option<String>,

    /// Enable profiler-internal diagnostics on stderr
    #[arg(long = "debug")]
    pub debug: bool,

    /// Event trace to execute (optionally followed by its arguments)
    pub script: Option<String>,

    /// Arguments passed through to the profiled program
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub argv: Vec<String>,
}

impl Cli {
    /// Resolve the output format: an explicit flag wins, then the
    /// `cachegrind.out.` naming convention, then text.
    pub fn effective_format(&self) -> OutputFormat {
        if let Some(format) = self.format {
            return format;
        }
        let basename = self
            .out
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(self.out.as_str());
        if basename.starts_with("cachegrind.out.") {
            OutputFormat::Callgrind
        } else {
            OutputFormat::Text
        }
    }

    /// Full recorded command line, echoed into report headers.
    pub fn command_line(&self) -> Option<String> {
        let mut args: Vec<&str> = Vec::new();
        if let Some(module) = &self.module {
            args.push(module.as_str());
        }
        if let Some(script) = &self.script {
            args.push(script.as_str());
        }
        args.extend(self.argv.iter().map(|s| s.as_str()));
        if args.is_empty() {
            None
        } else {
            Some(format!("{:?}", args))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_script_and_argv() {
        let cli = Cli::parse_from(["lineprof", "run.trace.jsonl", "arg1", "arg2"]);
        assert_eq!(cli.script.as_deref(), Some("run.trace.jsonl"));
        assert_eq!(cli.argv, vec!["arg1", "arg2"]);
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["lineprof", "run.trace.jsonl"]);
        assert_eq!(cli.out, "-");
        assert_eq!(cli.threads, 1);
        assert_eq!(cli.statistic, 0.0);
        assert!(cli.format.is_none());
        assert!(!cli.exclude_syspath);
        assert!(!cli.debug);
        assert_eq!(cli.effective_format(), OutputFormat::Text);
    }

    #[test]
    fn test_cli_threads_zero() {
        let cli = Cli::parse_from(["lineprof", "-t", "0", "run.trace.jsonl"]);
        assert_eq!(cli.threads, 0);
    }

    #[test]
    fn test_cli_statistic_period() {
        let cli = Cli::parse_from(["lineprof", "--statistic", "0.01", "run.trace.jsonl"]);
        assert_eq!(cli.statistic, 0.01);
    }

    #[test]
    fn test_cli_explicit_format_wins() {
        let cli = Cli::parse_from([
            "lineprof",
            "--format",
            "text",
            "-o",
            "cachegrind.out.1234",
            "run.trace.jsonl",
        ]);
        assert_eq!(cli.effective_format(), OutputFormat::Text);
    }

    #[test]
    fn test_cli_cachegrind_autodetect() {
        let cli = Cli::parse_from(["lineprof", "-o", "out/cachegrind.out.1234", "run.trace.jsonl"]);
        assert_eq!(cli.effective_format(), OutputFormat::Callgrind);
    }

    #[test]
    fn test_cli_callgrindzip_format() {
        let cli = Cli::parse_from(["lineprof", "--format", "callgrindzip", "run.trace.jsonl"]);
        assert_eq!(cli.effective_format(), OutputFormat::CallgrindZip);
    }

    #[test]
    fn test_cli_filters_repeatable() {
        let cli = Cli::parse_from([
            "lineprof",
            "--include",
            "demo",
            "--include",
            "lib",
            "--exclude",
            "demo/vendor",
            "--exclude-syspath",
            "run.trace.jsonl",
        ]);
        assert_eq!(cli.include, vec!["demo", "lib"]);
        assert_eq!(cli.exclude, vec!["demo/vendor"]);
        assert!(cli.exclude_syspath);
    }

    #[test]
    fn test_cli_module_mode() {
        // With -m, positionals are the profiled program's own arguments;
        // the first still lands in `script` and is forwarded.
        let cli = Cli::parse_from(["lineprof", "-m", "fibo", "--", "10", "20"]);
        assert_eq!(cli.module.as_deref(), Some("fibo"));
        assert_eq!(cli.script.as_deref(), Some("10"));
        assert_eq!(cli.argv, vec!["20"]);
    }

    #[test]
    fn test_cli_zipfile() {
        let cli = Cli::parse_from(["lineprof", "-z", "sources.zip", "run.trace.jsonl"]);
        assert_eq!(cli.zipfile.as_deref(), Some("sources.zip"));
    }

    #[test]
    fn test_cli_command_line_echo() {
        let cli = Cli::parse_from(["lineprof", "run.trace.jsonl", "x"]);
        assert_eq!(
            cli.command_line().unwrap(),
            r#"["run.trace.jsonl", "x"]"#
        );
        let empty = Cli::parse_from(["lineprof"]);
        assert!(empty.command_line().is_none());
    }

    #[test]
    fn test_cli_argv_allows_hyphen_values() {
        let cli = Cli::parse_from(["lineprof", "run.trace.jsonl", "--flag-for-target"]);
        assert_eq!(cli.argv, vec!["--flag-for-target"]);
    }
}
