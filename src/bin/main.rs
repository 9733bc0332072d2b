use clap::{ArgAction, Parser};
use rwheaplib::process::{self, ProcessId};
use rwheaplib::{patch_heap, Error, PatchReport, PatchRequest, Result};
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Searches for a string in the heap of a running process and replaces it
/// with another string of the same length or less.
///
/// Reading and writing another process's memory usually needs root.
#[derive(Parser, Debug)]
#[command(name = "read_write_heap", version)]
struct Args {
    /// Id of the target process
    #[arg(allow_hyphen_values = true)]
    pid: String,

    /// ASCII string to search for
    #[arg(allow_hyphen_values = true)]
    search: String,

    /// ASCII replacement, padded with null bytes to the search length
    #[arg(allow_hyphen_values = true)]
    replace: String,

    /// Read the patched bytes back and check that the write landed
    #[arg(long)]
    verify: bool,

    /// More logging, repeat for trace output
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(&args) {
        Ok(_) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::from(err.exit_code())
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("read_write_heap={level},rwheaplib={level}"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: &Args) -> Result<PatchReport> {
    let pid: ProcessId = args.pid.parse()?;
    let search = ascii_bytes("Search", &args.search)?;
    let replace = ascii_bytes("Replacement", &args.replace)?;
    if search.is_empty() {
        return Err(Error::InvalidArgument(
            "Search string must not be empty".to_string(),
        ));
    }
    let request = PatchRequest::new(pid, search, replace)?.verify(args.verify);

    if !process::process_exists(pid) {
        return Err(Error::ProcessNotFound { pid: pid.as_raw() });
    }
    if !process::is_privileged() {
        warn!("Not running as root, access to process {} may be denied", pid);
    }

    patch_heap(&request)
}

fn ascii_bytes(what: &str, value: &str) -> Result<Vec<u8>> {
    if !value.is_ascii() {
        return Err(Error::InvalidArgument(format!(
            "{} string '{}' is not ASCII",
            what, value
        )));
    }
    Ok(value.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use rwheaplib::ErrorKind;

    fn args(list: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("read_write_heap").chain(list.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_args() {
        let parsed = args(&["--verify", "-vv", "1234", "hello", "HELLO"]);
        assert_eq!(parsed.pid, "1234");
        assert_eq!(parsed.search, "hello");
        assert_eq!(parsed.replace, "HELLO");
        assert!(parsed.verify);
        assert_eq!(parsed.verbose, 2);
    }

    #[test]
    fn test_wrong_argument_count() {
        let result = Args::try_parse_from(["read_write_heap", "1234", "hello"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_pid() {
        for pid in ["abc", "0", "-5"] {
            let err = run(&args(&[pid, "hello", "HELLO"])).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
            assert_eq!(err.to_string(), "PID must be a positive integer");
        }
    }

    #[test]
    fn test_replacement_too_long() {
        let err = run(&args(&["1", "abc", "abcd"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(err.to_string(), "Replacement string too long (4 > 3)");
    }

    #[test]
    fn test_non_ascii_and_empty_strings() {
        let err = run(&args(&["1", "héllo", "x"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let err = run(&args(&["1", "", ""])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_missing_process() {
        let pid = i32::MAX.to_string();
        let err = run(&args(&[pid.as_str(), "hello", "HELLO"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessNotFound);
        assert_eq!(err.exit_code(), 3);
    }
}
