//! Config validation CLI tool
//!
//! Validates a spad configuration file, reports any errors and prints the
//! declared schedules as a table.

use spa_config::{ConfigError, Manifest, CURRENT_CONFIG_VERSION};
use spa_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a spad configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            eprintln!("  validate-config spa.example.toml");
            return ExitCode::from(2);
        }
    };

    // Check file exists
    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match spa_config::load_config(&config_path) {
        Ok(manifest) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", CURRENT_CONFIG_VERSION);
            println!("  Targets: {}", manifest.targets.len());
            println!("  Schedules: {}", manifest.schedules.len());

            if !manifest.warnings.is_empty() {
                println!();
                println!("Warnings ({}):", manifest.warnings.len());
                for warning in &manifest.warnings {
                    println!("  - {}", warning);
                }
            }

            if !manifest.schedules.is_empty() {
                println!();
                print_schedules(&manifest);
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver, CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}

fn print_schedules(manifest: &Manifest) {
    const HEADER: [&str; 9] = [
        "NAME", "TARGET", "TYPE", "STARTTIME", "ENDTIME", "STARTDAY", "ENDDAY", "MIN", "MAX",
    ];

    let rows: Vec<[String; 9]> = manifest
        .schedules
        .iter()
        .map(|s| {
            let optional = |v: Option<u32>| v.map(|n| n.to_string()).unwrap_or_default();
            [
                s.id.to_string(),
                s.spec.target.clone(),
                s.spec.schedule_type.to_string(),
                s.spec.start_time.clone(),
                s.spec.end_time.clone(),
                s.spec.start_day_of_week.clone().unwrap_or_default(),
                s.spec.end_day_of_week.clone().unwrap_or_default(),
                optional(s.spec.min_replicas),
                optional(s.spec.max_replicas),
            ]
        })
        .collect();

    let mut widths = HEADER.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }

    let line = |cells: Vec<&str>| {
        let padded: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect();
        println!("{}", padded.join("   ").trim_end());
    };

    line(HEADER.to_vec());
    for row in &rows {
        line(row.iter().map(String::as_str).collect());
    }
}
