//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `graphstack_core` linkage and print its version.
//! - Optionally start rolling file logging.
//! - Optionally open an in-memory stack against a model file and report it.
//!
//! Usage: `graphstack_cli [--log-dir DIR] [--log-level LEVEL] [MODEL_JSON]`

use graphstack_core::model::bundle::load_model_file;
use graphstack_core::{core_version, init_logging, LogLevel, PersistenceStack};
use log::info;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Default, PartialEq, Eq)]
struct CliArgs {
    log_dir: Option<PathBuf>,
    log_level: Option<String>,
    model_path: Option<PathBuf>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<CliArgs, String> {
    let mut parsed = CliArgs::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--log-dir" => {
                let dir = args.next().ok_or("--log-dir needs a directory")?;
                parsed.log_dir = Some(PathBuf::from(dir));
            }
            "--log-level" => {
                let level = args.next().ok_or("--log-level needs a level")?;
                parsed.log_level = Some(level);
            }
            flag if flag.starts_with("--") => return Err(format!("unknown option `{flag}`")),
            _ if parsed.model_path.is_some() => {
                return Err(format!("unexpected argument `{arg}`"));
            }
            _ => parsed.model_path = Some(PathBuf::from(arg)),
        }
    }
    Ok(parsed)
}

fn start_logging(args: &CliArgs) -> Result<(), String> {
    let Some(log_dir) = &args.log_dir else {
        return Ok(());
    };
    let log_dir = if log_dir.is_absolute() {
        log_dir.clone()
    } else {
        std::env::current_dir()
            .map_err(|err| format!("cannot resolve log dir: {err}"))?
            .join(log_dir)
    };
    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| LogLevel::default_for_build().as_str().to_string());
    init_logging(&level, &log_dir.to_string_lossy()).map_err(|err| err.to_string())
}

fn main() -> ExitCode {
    println!("graphstack_core version={}", core_version());

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(err) = start_logging(&args) {
        eprintln!("error: {err}");
        return ExitCode::FAILURE;
    }
    info!(
        "event=cli_start module=cli status=ok version={}",
        core_version()
    );

    let Some(model_path) = args.model_path else {
        return ExitCode::SUCCESS;
    };

    let model = match load_model_file(&model_path) {
        Ok(model) => model,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    match PersistenceStack::in_memory(Some(model)) {
        Ok(mut stack) => {
            println!("entities={}", stack.model().entity_names().join(","));
            match stack.save() {
                Ok(outcome) => {
                    println!("save={outcome:?}");
                    ExitCode::SUCCESS
                }
                Err(err) => {
                    eprintln!("error: {err}");
                    ExitCode::FAILURE
                }
            }
        }
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_args, start_logging, CliArgs};
    use graphstack_core::logging_status;
    use std::path::PathBuf;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn parses_log_options_and_model_path() {
        let parsed = parse_args(args(&[
            "--log-dir",
            "/tmp/logs",
            "--log-level",
            "info",
            "model.json",
        ]))
        .unwrap();
        assert_eq!(
            parsed,
            CliArgs {
                log_dir: Some(PathBuf::from("/tmp/logs")),
                log_level: Some("info".to_string()),
                model_path: Some(PathBuf::from("model.json")),
            }
        );
        assert_eq!(parse_args(Vec::new()).unwrap(), CliArgs::default());
    }

    #[test]
    fn rejects_missing_values_and_unknown_options() {
        assert!(parse_args(args(&["--log-dir"])).is_err());
        assert!(parse_args(args(&["--verbose"])).is_err());
        assert!(parse_args(args(&["a.json", "b.json"])).is_err());
    }

    #[test]
    fn log_dir_option_starts_file_logging() {
        let dir = tempfile::tempdir().unwrap();
        let parsed = CliArgs {
            log_dir: Some(dir.path().to_path_buf()),
            log_level: Some("info".to_string()),
            model_path: None,
        };
        start_logging(&parsed).unwrap();

        let (level, log_dir) = logging_status().unwrap();
        assert_eq!(level.as_str(), "info");
        assert_eq!(log_dir, dir.path());
    }
}
