use std::path::Path;

use {
    anyhow::Result,
    clap::Subcommand,
    relay_config::{RelayConfig, Severity, ValidationResult, validate},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration and report errors/warnings.
    Check,
    /// Print the effective configuration (token redacted).
    Show,
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// Load `path` if given, otherwise discover. Env overrides apply either way.
pub fn load(path: Option<&Path>) -> Result<RelayConfig> {
    match path {
        Some(path) => {
            let mut config = relay_config::load_config(path)?;
            relay_config::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
            Ok(config)
        },
        None => Ok(relay_config::discover_and_load()),
    }
}

pub fn handle_config(action: ConfigAction, config: &RelayConfig) -> Result<()> {
    match action {
        ConfigAction::Check => check(config),
        ConfigAction::Show => {
            println!("{config:#?}");
            Ok(())
        },
    }
}

fn check(config: &RelayConfig) -> Result<()> {
    let result = validate(config);
    print_diagnostics(&result);

    let errors = count(&result, Severity::Error);
    let warnings = count(&result, Severity::Warning);
    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if errors > 0 {
        anyhow::bail!("configuration is invalid");
    }
    Ok(())
}

fn count(result: &ValidationResult, severity: Severity) -> usize {
    result
        .diagnostics
        .iter()
        .filter(|d| d.severity == severity)
        .count()
}

/// Print every diagnostic to stderr.
pub fn print_diagnostics(result: &ValidationResult) {
    for d in &result.diagnostics {
        let color = match d.severity {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
        };
        eprintln!("  {BOLD}{color}{}{RESET} {}: {}", d.severity, d.path, d.message);
    }
}
