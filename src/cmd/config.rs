//! Configuration view and validation commands: `quill config`.

use anyhow::Result;

use quill::config::{CONFIG_FILE_NAME, CliOverrides, QuillConfig, QuillToml};

use super::super::ConfigCommands;

pub fn cmd_config(config: &QuillConfig, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = config.config_path();

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Quill Configuration");
            println!("===================");
            println!();

            if config.has_config_file() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No {} found at {}", CONFIG_FILE_NAME, config_path.display());
                println!("Using default configuration.");
            }
            println!();
            print_toml(&config.toml);

            println!("Effective values (with env overrides):");
            let effective = config.pipeline_config(&CliOverrides::default())?;
            println!("  max_revisions = {}", effective.max_revisions);
            println!("  quality_threshold = {}", effective.quality_threshold);
            println!("  context_budget = \"{}\"", effective.context_budget);
            println!("  retry_limit = {}", effective.retry_limit);
            match config.backend_command(&CliOverrides::default()) {
                Some((program, _)) => println!("  backend = \"{}\"", program),
                None => println!("  backend = (none, pass --scripted or --backend-cmd)"),
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config.has_config_file() {
                println!("No {} found. Using defaults (valid).", CONFIG_FILE_NAME);
                return Ok(());
            }

            let problems = config.toml.validate();
            if problems.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration problems:");
                for problem in &problems {
                    println!("  - {}", problem);
                }
                println!();
                anyhow::bail!("{} configuration problem(s) found", problems.len());
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!(
                    "{} already exists at {}",
                    CONFIG_FILE_NAME,
                    config_path.display()
                );
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !config.quill_dir.exists() {
                std::fs::create_dir_all(&config.quill_dir)?;
            }
            QuillToml::default().save(&config_path)?;

            println!("Created {} at {}", CONFIG_FILE_NAME, config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [pipeline] max_revisions, quality_threshold, context_budget");
            println!("  - [retry] retry_limit, call_timeout_secs, backoff_base_ms, backoff_max_ms");
            println!("  - [backend] command, args");
            println!("  - [logging] level, format, dir");
            println!();
        }
    }

    Ok(())
}

fn print_toml(toml: &QuillToml) {
    println!("[pipeline]");
    println!("  max_revisions = {}", toml.pipeline.max_revisions);
    println!("  quality_threshold = {}", toml.pipeline.quality_threshold);
    println!("  context_budget = \"{}\"", toml.pipeline.context_budget);
    println!();
    println!("[retry]");
    println!("  retry_limit = {}", toml.retry.retry_limit);
    println!("  call_timeout_secs = {}", toml.retry.call_timeout_secs);
    println!("  backoff_base_ms = {}", toml.retry.backoff_base_ms);
    println!("  backoff_max_ms = {}", toml.retry.backoff_max_ms);
    println!();
    if let Some(command) = &toml.backend.command {
        println!("[backend]");
        println!("  command = \"{}\"", command);
        if !toml.backend.args.is_empty() {
            println!("  args = {:?}", toml.backend.args);
        }
        println!();
    }
    println!("[logging]");
    println!("  level = \"{}\"", toml.logging.level);
    println!("  format = \"{}\"", toml.logging.format);
    if let Some(dir) = &toml.logging.dir {
        println!("  dir = \"{}\"", dir.display());
    }
    println!();
}
