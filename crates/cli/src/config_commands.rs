use std::path::Path;

use {anyhow::Result, clap::Subcommand};

use courier_config::{Diagnostic, Severity, ValidationResult};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML (secrets redacted).
    Show,
    /// Validate the configuration and report errors/warnings.
    Check,
    /// Print where configuration files are looked up.
    Path,
}

pub fn handle_config(action: ConfigAction, config_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = courier_config::load_or_discover(config_path)?;
            print!("{}", courier_config::to_toml_string(&config)?);
            Ok(())
        },
        ConfigAction::Check => check(config_path),
        ConfigAction::Path => {
            match config_path
                .map(Path::to_path_buf)
                .or_else(courier_config::find_config_file)
            {
                Some(path) => println!("config file: {}", path.display()),
                None => println!("config file: none (using defaults)"),
            }
            if let Some(dir) = courier_config::config_dir() {
                println!("user config dir: {}", dir.display());
            }
            Ok(())
        },
    }
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(config_path: Option<&Path>) -> Result<()> {
    match config_path
        .map(Path::to_path_buf)
        .or_else(courier_config::find_config_file)
    {
        Some(path) => eprintln!("Checking {}\n", path.display()),
        None => eprintln!("No config file found; checking defaults.\n"),
    }

    let config = courier_config::load_or_discover(config_path)?;
    let result = courier_config::validate(&config);

    for d in &result.diagnostics {
        eprintln!("  {}", colored(d));
    }
    if !result.diagnostics.is_empty() {
        eprintln!();
    }
    eprintln!("{}", summary_line(&result));

    if result.has_errors() {
        std::process::exit(1);
    }
    Ok(())
}

fn colored(d: &Diagnostic) -> String {
    let color = match d.severity {
        Severity::Error => RED,
        Severity::Warning => YELLOW,
    };
    format!("{BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message)
}

fn summary_line(result: &ValidationResult) -> String {
    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if errors == 0 && warnings == 0 {
        "No issues found.".to_string()
    } else {
        format!("{errors} error(s), {warnings} warning(s)")
    }
}
