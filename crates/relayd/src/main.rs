use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use relay_core::{has_errors, load_config, TaskId, TaskStatus, Validate, ValidationLevel};
use relayd::{sign, TaskQuery, TaskStore};

const DEFAULT_CONFIG: &str = "config/relay.toml";

#[derive(Debug, Parser)]
#[command(name = "relayd", about = "Operator tools for the relay task engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate a configuration file.
    CheckConfig {
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// List tasks from the task store, newest first.
    Tasks {
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        #[arg(long)]
        status: Option<TaskStatus>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Print one task and its log.
    Show {
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        task_id: String,
    },
    /// Print the signature header value for a payload file.
    Sign {
        #[arg(long, env = "RELAY_WEBHOOK_SECRET")]
        secret: String,
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("relayd: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::CheckConfig { config } => check_config(config),
        Command::Tasks {
            config,
            status,
            limit,
        } => {
            let store = open_store(&config)?;
            let tasks = store.list_tasks(&TaskQuery {
                status,
                limit,
                offset: 0,
            })?;
            if tasks.is_empty() {
                println!("no tasks");
            }
            for task in tasks {
                println!(
                    "{:<40} {:<10} #{:<6} retries {}/{}  {}",
                    task.id,
                    task.status,
                    task.issue.number,
                    task.retry_count,
                    task.max_retries,
                    task.issue.title
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Show { config, task_id } => {
            let store = open_store(&config)?;
            let task_id = TaskId::new(task_id);
            let Some(task) = store.load_task(&task_id)? else {
                bail!("task not found: {task_id}");
            };
            println!("{}", serde_json::to_string_pretty(&task)?);
            for entry in store.list_logs(&task_id, None)? {
                println!(
                    "{} [{}] {}",
                    entry.at.format("%Y-%m-%d %H:%M:%S"),
                    entry.level,
                    entry.message
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Sign { secret, file } => {
            let body = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            println!("{}", sign(&body, secret.as_bytes())?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn check_config(path: PathBuf) -> Result<ExitCode> {
    let config = load_config(&path)
        .with_context(|| format!("failed to load config at {}", path.display()))?;
    let issues = config.validate();
    for issue in &issues {
        let level = match issue.level {
            ValidationLevel::Error => "error",
            ValidationLevel::Warning => "warning",
        };
        println!("{level}: [{}] {}", issue.code, issue.message);
    }
    if has_errors(&issues) {
        return Ok(ExitCode::FAILURE);
    }
    println!("config ok: {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn open_store(config_path: &Path) -> Result<TaskStore> {
    let config = load_config(config_path)
        .with_context(|| format!("failed to load config at {}", config_path.display()))?;
    let path = &config.storage.sqlite_path;
    TaskStore::open(path).with_context(|| format!("failed to open task store at {}", path.display()))
}
