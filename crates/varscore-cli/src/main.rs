use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use varscore_core::{ResourceRequest, RunConfiguration, SchedulerKind};

#[derive(Parser)]
#[command(
    name = "varscore",
    version = "0.1.0",
    about = "Shard a variant scoring computation across a cluster scheduler"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SchedulerArg {
    #[value(name = "slurm")]
    Slurm,
    #[value(name = "local")]
    Local,
}

impl From<SchedulerArg> for SchedulerKind {
    fn from(value: SchedulerArg) -> Self {
        match value {
            SchedulerArg::Slurm => SchedulerKind::Slurm,
            SchedulerArg::Local => SchedulerKind::Local,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    Run {
        model: PathBuf,
        dataset: PathBuf,
        #[arg(short = 'o', long, default_value = "varscore_out")]
        out_dir: PathBuf,
        #[arg(short = 'p', long = "shards", default_value_t = 1)]
        shards: u32,
        #[arg(long)]
        max_concurrent: Option<usize>,
        #[arg(short = 'r', long)]
        restart: bool,
        #[arg(long, value_enum, default_value_t = SchedulerArg::Slurm)]
        scheduler: SchedulerArg,
        #[arg(short = 'q', long, default_value = "standard")]
        queue: String,
        #[arg(long, default_value_t = 1)]
        gpus: u32,
        #[arg(long, default_value_t = 22000)]
        mem_mb: u64,
        #[arg(long, default_value = "14-0:0:0")]
        time_limit: String,
        #[arg(long)]
        env: Option<String>,
        #[arg(long, default_value = "varscore-worker")]
        worker: String,
        #[arg(long, default_value = "varscore")]
        name: String,
        #[arg(long = "result-file", default_value = "scores.jsonl")]
        result_file: String,
        #[arg(long, default_value_t = 60)]
        poll_interval_secs: u64,
        #[arg(long, default_value_t = 10)]
        launch_interval_secs: u64,
        #[arg(long)]
        strict: bool,
        #[arg(long)]
        json: bool,
    },
    Status {
        #[arg(short = 'o', long)]
        out_dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
    Merge {
        #[arg(short = 'o', long)]
        out_dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
    Stop {
        #[arg(short = 'o', long)]
        out_dir: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            model,
            dataset,
            out_dir,
            shards,
            max_concurrent,
            restart,
            scheduler,
            queue,
            gpus,
            mem_mb,
            time_limit,
            env,
            worker,
            name,
            result_file,
            poll_interval_secs,
            launch_interval_secs,
            strict,
            json,
        } => {
            let config = RunConfiguration {
                schema_version: varscore_core::config::SNAPSHOT_SCHEMA_VERSION.to_string(),
                model,
                dataset,
                out_dir,
                total_shards: shards,
                max_concurrent,
                scheduler: scheduler.into(),
                queue,
                resources: ResourceRequest {
                    gpus,
                    mem_mb,
                    time_limit,
                },
                name,
                worker,
                env_setup: env,
                result_filename: result_file,
                poll_interval_secs,
                launch_interval_secs,
                restart,
                strict,
            };
            let report = varscore_runner::execute(config)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "report": run_report_to_json(&report),
                })));
            }
            println!("out_dir: {}", report.out_dir.display());
            println!("merged: {}", report.merged_path.display());
            println!(
                "shards: {} (skipped {}, submitted {}, recovered {})",
                report.total_shards, report.skipped, report.submitted, report.recovered
            );
            println!("records: {}", report.records);
        }
        Commands::Status { out_dir, json } => {
            let report = varscore_runner::status(&out_dir)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "status",
                    "status": status_report_to_json(&report),
                })));
            }
            println!("out_dir: {}", report.out_dir.display());
            match &report.state {
                Some(state) => println!("state: {} ({})", state.state, state.detail),
                None => println!("state: unknown"),
            }
            println!(
                "complete: {}/{}",
                report.complete_shards, report.total_shards
            );
            for shard in &report.shards {
                println!(
                    "  job{}: {}",
                    shard.shard_index,
                    if shard.complete { "complete" } else { "incomplete" }
                );
            }
            println!("merged: {}", report.merged);
        }
        Commands::Merge { out_dir, json } => {
            let report = varscore_runner::merge(&out_dir)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "merge",
                    "merge": merge_report_to_json(&report),
                })));
            }
            println!("merged: {}", report.merged_path.display());
            println!("shards: {}", report.shards);
            println!("records: {}", report.records);
        }
        Commands::Stop { out_dir, json } => {
            let path = varscore_runner::request_stop(&out_dir)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "stop",
                    "stop_request": path.display().to_string(),
                })));
            }
            println!("stop requested: {}", path.display());
        }
    }
    Ok(None)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Status { json, .. }
        | Commands::Merge { json, .. }
        | Commands::Stop { json, .. } => *json,
    }
}

fn run_report_to_json(report: &varscore_runner::RunReport) -> Value {
    json!({
        "out_dir": report.out_dir.display().to_string(),
        "merged_path": report.merged_path.display().to_string(),
        "total_shards": report.total_shards,
        "skipped": report.skipped,
        "submitted": report.submitted,
        "recovered": report.recovered,
        "records": report.records,
    })
}

fn status_report_to_json(report: &varscore_runner::StatusReport) -> Value {
    json!({
        "out_dir": report.out_dir.display().to_string(),
        "state": report.state.as_ref().map(|s| json!({
            "state": s.state,
            "detail": s.detail,
            "updated_at": s.updated_at,
        })),
        "total_shards": report.total_shards,
        "complete_shards": report.complete_shards,
        "shards": report.shards.iter().map(|s| json!({
            "shard_index": s.shard_index,
            "complete": s.complete,
        })).collect::<Vec<_>>(),
        "merged": report.merged,
    })
}

fn merge_report_to_json(report: &varscore_runner::MergeReport) -> Value {
    json!({
        "merged_path": report.merged_path.display().to_string(),
        "shards": report.shards,
        "records": report.records,
    })
}
