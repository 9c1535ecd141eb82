//! `info` command implementation.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use config_loader::ConfigLoader;
use contracts::PipelineBlueprint;
use serde::Serialize;
use tracing::info;

use super::display_attr;
use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    pipeline: PipelineInfo,
    sinks: Vec<SinkInfo>,
}

#[derive(Serialize)]
struct PipelineInfo {
    name: String,
    input_capacity: usize,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    queue_capacity: usize,
    on_error: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    attrs: BTreeMap<String, String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let blueprint = ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.resolved {
        println!("{}", resolved_config(&blueprint, args.json)?);
    } else if args.json {
        let info = build_config_info(&blueprint, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&blueprint, args);
    }

    Ok(())
}

fn build_config_info(blueprint: &PipelineBlueprint, args: &InfoArgs) -> ConfigInfo {
    let sinks = blueprint
        .sinks
        .iter()
        .map(|s| SinkInfo {
            name: s.name.clone(),
            sink_type: s.sink_type.clone(),
            queue_capacity: s.queue_capacity,
            on_error: format!("{:?}", s.on_error),
            attrs: if args.sinks {
                s.attrs
                    .iter()
                    .map(|(k, v)| (k.clone(), display_attr(k, v).to_string()))
                    .collect()
            } else {
                BTreeMap::new()
            },
        })
        .collect();

    ConfigInfo {
        version: format!("{:?}", blueprint.version),
        pipeline: PipelineInfo {
            name: blueprint.pipeline.name.clone(),
            input_capacity: blueprint.pipeline.input_capacity,
        },
        sinks,
    }
}

/// Effective configuration, secrets redacted
fn resolved_config(blueprint: &PipelineBlueprint, json: bool) -> Result<String> {
    let mut redacted = blueprint.clone();
    for sink in &mut redacted.sinks {
        for (key, value) in sink.attrs.iter_mut() {
            *value = display_attr(key, value).to_string();
        }
    }

    let rendered = if json {
        ConfigLoader::to_json(&redacted)
    } else {
        ConfigLoader::to_toml(&redacted)
    };
    rendered.context("Failed to render resolved config")
}

fn print_config_info(blueprint: &PipelineBlueprint, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                  logport Configuration                       ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("⚙️  Pipeline");
    println!("   ├─ Version: {:?}", blueprint.version);
    println!("   ├─ Name: {}", blueprint.pipeline.name);
    println!("   └─ Input capacity: {}", blueprint.pipeline.input_capacity);

    println!("\n📤 Sinks ({})", blueprint.sinks.len());
    for (i, sink) in blueprint.sinks.iter().enumerate() {
        let is_last = i == blueprint.sinks.len() - 1;
        let prefix = if is_last { "└─" } else { "├─" };
        let child_prefix = if is_last { "   " } else { "│  " };

        println!(
            "   {} {} ({}, queue {}, on_error {:?})",
            prefix, sink.name, sink.sink_type, sink.queue_capacity, sink.on_error
        );

        if args.sinks {
            let attrs: BTreeMap<_, _> = sink.attrs.iter().collect();
            for (j, (key, value)) in attrs.iter().enumerate() {
                let attr_prefix = if j == attrs.len() - 1 { "└─" } else { "├─" };
                println!(
                    "   {}  {} {} = {}",
                    child_prefix,
                    attr_prefix,
                    key,
                    display_attr(key, value)
                );
            }
        }
    }

    println!();
}
