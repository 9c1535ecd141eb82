//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{PipelineBlueprint, SinkConfig};
use dispatcher::{Compression, FileSinkConfig, OutputRegistry, PgSinkConfig};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    pipeline: String,
    input_capacity: usize,
    sink_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    if !args.config.exists() {
        return invalid(config_path, format!("File not found: {}", args.config.display()));
    }

    let blueprint = match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(blueprint) => blueprint,
        Err(e) => return invalid(config_path, e.to_string()),
    };

    // Sink attributes are only checked by the factories, catch mistakes here
    if let Err(e) = check_sink_attrs(&blueprint) {
        return invalid(config_path, e);
    }

    let warnings = collect_warnings(&blueprint);
    ValidationResult {
        valid: true,
        config_path,
        error: None,
        warnings: if warnings.is_empty() {
            None
        } else {
            Some(warnings)
        },
        summary: Some(ConfigSummary {
            version: format!("{:?}", blueprint.version),
            pipeline: blueprint.pipeline.name.clone(),
            input_capacity: blueprint.pipeline.input_capacity,
            sink_count: blueprint.sinks.len(),
        }),
    }
}

fn invalid(config_path: String, error: String) -> ValidationResult {
    ValidationResult {
        valid: false,
        config_path,
        error: Some(error),
        warnings: None,
        summary: None,
    }
}

/// Check every sink against the built-in sink types
fn check_sink_attrs(blueprint: &PipelineBlueprint) -> Result<(), String> {
    let known = OutputRegistry::with_builtin().names();
    for sink in &blueprint.sinks {
        let checked = match sink.sink_type.as_str() {
            "file" => FileSinkConfig::from_params(&sink.attrs).map(drop),
            "pg" => PgSinkConfig::from_params(&sink.attrs).map(drop),
            other => Err(format!(
                "unknown sink type '{other}', expected one of {known:?}"
            )),
        };
        checked.map_err(|e| format!("sink '{}': {e}", sink.name))?;
    }
    Ok(())
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(blueprint: &PipelineBlueprint) -> Vec<String> {
    blueprint.sinks.iter().filter_map(sink_warning).collect()
}

fn sink_warning(sink: &SinkConfig) -> Option<String> {
    match sink.sink_type.as_str() {
        "file" => {
            let config = FileSinkConfig::from_params(&sink.attrs).ok()?;
            let gz_name = config.path.extension().is_some_and(|ext| ext == "gz");
            (config.compression == Compression::Gzip && !gz_name).then(|| {
                format!(
                    "Sink '{}' writes gzip to '{}' which has no .gz extension",
                    sink.name,
                    config.path.display()
                )
            })
        }
        "pg" => {
            let config = PgSinkConfig::from_params(&sink.attrs).ok()?;
            (!config.create_if_not_exists).then(|| {
                format!(
                    "Sink '{}' expects table '{}' to exist (create_if_not_exists is off)",
                    sink.name, config.table_name
                )
            })
        }
        _ => None,
    }
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Pipeline: {}", summary.pipeline);
            println!("  Input capacity: {}", summary.input_capacity);
            println!("  Sinks: {}", summary.sink_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args_for(content: &str) -> (tempfile::NamedTempFile, ValidateArgs) {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let args = ValidateArgs {
            config: file.path().to_path_buf(),
            json: true,
        };
        (file, args)
    }

    #[test]
    fn test_valid_config_with_warnings() {
        let (_file, args) = args_for(
            r#"
[[sinks]]
name = "archive"
sink_type = "file"
[sinks.attrs]
path = "/tmp/out.log"
compress = "gzip"
"#,
        );
        let result = validate_config(&args);
        assert!(result.valid);
        let warnings = result.warnings.unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("no .gz extension"));
    }

    #[test]
    fn test_missing_sink_attr_is_invalid() {
        let (_file, args) = args_for(
            r#"
[[sinks]]
name = "warehouse"
sink_type = "pg"
[sinks.attrs]
db_url = "postgres://localhost/logs"
"#,
        );
        let result = validate_config(&args);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("table_name"));
    }

    #[test]
    fn test_unknown_sink_type_is_invalid() {
        let (_file, args) = args_for(
            r#"
[[sinks]]
name = "remote"
sink_type = "kafka"
"#,
        );
        let result = validate_config(&args);
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("unknown sink type 'kafka'"));
    }
}
