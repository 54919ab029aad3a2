//! Thin command-line front end: maps CLI verbs onto control-plane
//! requests, expands YAML manifests into start commands, and runs the
//! daemon in the foreground for `procvisor daemon`.
//!
//! Exit codes: `0` success, `1` server-returned failure, `2` transport
//! failure.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};

use procvisor::config::DaemonConfig;
use procvisor::control::{exit_code, Client, Request, RequestOptions};
use procvisor::manifest::Manifest;
use procvisor::registry::{EntrySpec, LogFormat, LogOutput};
use procvisor::{daemon, Reply};

#[derive(Parser)]
#[command(name = "procvisor", version, about = "Local process supervisor")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor daemon in the foreground
    Daemon,
    /// Start a script (or every app in a YAML manifest)
    Start {
        /// Script path, manifest path, or a retained process to revive
        target: String,
        /// Process name (defaults to the script's file stem)
        #[arg(long)]
        name: Option<String>,
        /// Restart on changes under the script's directory
        #[arg(long)]
        watch: bool,
        /// Environment overlay entries, KEY=VALUE
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// Working directory for the child
        #[arg(long)]
        cwd: Option<PathBuf>,
        /// Interpreter override (defaults to node)
        #[arg(long)]
        interpreter: Option<String>,
        /// Extra watch ignore patterns
        #[arg(long = "watch-ignore")]
        watch_ignore: Vec<String>,
        /// Memory budget, e.g. 512mb
        #[arg(long)]
        memory_limit: Option<String>,
        /// CPU budget in percent (0-100)
        #[arg(long)]
        cpu_limit: Option<f64>,
        /// Initial restart delay in milliseconds
        #[arg(long)]
        restart_delay: Option<u64>,
        /// Max consecutive failed starts before restarts are denied
        #[arg(long)]
        max_restarts: Option<u32>,
        /// HTTP readiness URL probed after spawn
        #[arg(long)]
        health_check: Option<String>,
        /// Output framing: text or json
        #[arg(long)]
        log_format: Option<String>,
        /// Output destination: file or stdout
        #[arg(long)]
        log_output: Option<String>,
        /// Arguments passed to the script
        #[arg(last = true)]
        args: Vec<String>,
    },
    /// Stop a process (or all) and remove it
    Stop { target: String },
    /// Stop and respawn a process (or all) with the same spec
    Restart { target: String },
    /// Show all processes, or one in detail
    Status { target: Option<String> },
    /// Print the tail of a process's captured output
    Logs {
        target: String,
        /// Number of lines (default 20)
        #[arg(short = 'n', long)]
        lines: Option<usize>,
    },
    /// Force an immediate snapshot write
    Save,
    /// Remove a process in any state
    Delete { target: String },
    /// Install the boot-time init-system unit
    Startup,
    /// Unload and remove the boot-time unit
    Unstartup,
    /// Check that the daemon answers
    Ping,
}

fn parse_log_format(raw: &str) -> Result<LogFormat> {
    match raw {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => anyhow::bail!("log format must be 'text' or 'json', got '{other}'"),
    }
}

fn parse_log_output(raw: &str) -> Result<LogOutput> {
    match raw {
        "file" => Ok(LogOutput::File),
        "stdout" => Ok(LogOutput::Stdout),
        other => anyhow::bail!("log output must be 'file' or 'stdout', got '{other}'"),
    }
}

fn is_manifest(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yml") | Some("yaml")
    )
}

/// Builds the wire options for one manifest-expanded spec.
fn options_from_spec(spec: &EntrySpec) -> RequestOptions {
    RequestOptions {
        name: Some(spec.name.clone()),
        args: spec.args.clone(),
        cwd: spec.cwd.clone(),
        env: spec
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect(),
        interpreter: spec.interpreter.clone(),
        watch: Some(spec.watch),
        watch_ignore: spec.watch_ignore.clone(),
        memory_limit: spec.memory_limit.map(|b| format!("{b}b")),
        cpu_limit: spec.cpu_limit,
        restart_delay: spec.restart_delay,
        max_restarts: spec.max_restarts,
        health_check: spec.health_check.clone(),
        log_format: Some(spec.log_format),
        log_output: Some(spec.log_output),
        metrics_port: spec.metrics_port,
        lines: None,
    }
}

fn print_reply(reply: &Reply) {
    if reply.success {
        println!("{}", reply.message);
    } else {
        eprintln!("error: {}", reply.message);
    }
    if let Some(data) = &reply.data {
        if let Some(entries) = data.as_array() {
            for entry in entries {
                print_entry_line(entry);
            }
        } else if let Some(lines) = data.get("lines").and_then(|l| l.as_array()) {
            for line in lines {
                if let Some(line) = line.as_str() {
                    println!("{line}");
                }
            }
        } else if data.is_object() {
            println!("{}", serde_json::to_string_pretty(data).unwrap_or_default());
        }
    }
}

fn print_entry_line(entry: &serde_json::Value) {
    let get = |key: &str| entry.get(key).cloned().unwrap_or_default();
    println!(
        "{:<16} {:<12} {:<10} pid={:<8} restarts={:<4} cpu={:.1}% mem={}",
        get("name").as_str().unwrap_or("-"),
        get("id").as_str().unwrap_or("-"),
        get("state").as_str().unwrap_or("-"),
        get("osPid").as_u64().unwrap_or(0),
        get("restartCount").as_u64().unwrap_or(0),
        get("cpuPercent").as_f64().unwrap_or(0.0),
        get("rssBytes").as_u64().unwrap_or(0),
    );
}

async fn send(client: &Client, req: Request) -> i32 {
    let outcome = client.request(&req).await;
    match &outcome {
        Ok(reply) => print_reply(reply),
        Err(e) => eprintln!("error: {e}"),
    }
    exit_code(&outcome)
}

/// Expands a manifest into one start request per declared instance.
async fn start_from_manifest(client: &Client, path: &Path) -> Result<i32> {
    let manifest = Manifest::load(path).await?;
    let specs = manifest.expand()?;
    let mut worst = 0;
    for spec in specs {
        let req = Request::new("start")
            .with_target(spec.script.display().to_string())
            .with_options(options_from_spec(&spec));
        worst = send(client, req).await.max(worst);
    }
    Ok(worst)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = DaemonConfig::resolve();

    if let Commands::Daemon = cli.command {
        if let Err(e) = daemon::run(cfg).await {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
        return Ok(());
    }

    let client = Client::new(&cfg);
    let code = match cli.command {
        Commands::Daemon => unreachable!("handled above"),
        Commands::Start {
            target,
            name,
            watch,
            env,
            cwd,
            interpreter,
            watch_ignore,
            memory_limit,
            cpu_limit,
            restart_delay,
            max_restarts,
            health_check,
            log_format,
            log_output,
            args,
        } => {
            let path = PathBuf::from(&target);
            if is_manifest(&path) {
                start_from_manifest(&client, &path).await?
            } else {
                let options = RequestOptions {
                    name,
                    args,
                    cwd,
                    env,
                    interpreter,
                    watch: Some(watch),
                    watch_ignore,
                    memory_limit,
                    cpu_limit,
                    restart_delay,
                    max_restarts,
                    health_check,
                    log_format: log_format.as_deref().map(parse_log_format).transpose()?,
                    log_output: log_output.as_deref().map(parse_log_output).transpose()?,
                    metrics_port: None,
                    lines: None,
                };
                let req = Request::new("start").with_target(target).with_options(options);
                send(&client, req).await
            }
        }
        Commands::Stop { target } => send(&client, Request::new("stop").with_target(target)).await,
        Commands::Restart { target } => {
            send(&client, Request::new("restart").with_target(target)).await
        }
        Commands::Status { target } => {
            let mut req = Request::new("status");
            if let Some(target) = target {
                req = req.with_target(target);
            }
            send(&client, req).await
        }
        Commands::Logs { target, lines } => {
            let options = RequestOptions {
                lines,
                ..Default::default()
            };
            let req = Request::new("logs").with_target(target).with_options(options);
            send(&client, req).await
        }
        Commands::Save => send(&client, Request::new("save")).await,
        Commands::Delete { target } => {
            send(&client, Request::new("delete").with_target(target)).await
        }
        Commands::Startup => send(&client, Request::new("startup")).await,
        Commands::Unstartup => send(&client, Request::new("unstartup")).await,
        Commands::Ping => send(&client, Request::new("ping")).await,
    };

    std::process::exit(code);
}
