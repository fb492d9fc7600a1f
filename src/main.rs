use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

use kongtest::config::{self, HarnessConfig};
use kongtest::gateway::Gateway;
use kongtest::logs::Sentinel;
use kongtest::runtime::{ContainerInstance, RuntimeClient};
use kongtest::spec::Customizer;
use kongtest::telemetry;

#[derive(Parser)]
#[command(name = "kongtest")]
#[command(version, about = "Run a throwaway Kong gateway container", long_about = None)]
struct Args {
    /// Config file [default: ./.kongtest.yaml if present]
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Image to run, overriding the config
    #[arg(long, env = config::IMAGE_ENV)]
    image: Option<String>,

    /// Extra gateway environment, applied after the config
    #[arg(long = "env", short = 'e', value_name = "KEY=VALUE")]
    env: Vec<String>,

    /// Don't stream container output to stderr
    #[arg(long)]
    no_logs: bool,

    /// Debug logging for the harness itself
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    telemetry::init_stderr_tracing(args.verbose);

    let mut cfg = load_config(args.config.as_deref())?;
    if let Some(image) = args.image {
        cfg.image = image;
    }
    let mut customizers = cfg.customizers();
    customizers.extend(parse_env_args(&args.env)?);

    let client = RuntimeClient::from_config(&cfg).context("container engine unavailable")?;

    // Installed before the container exists so an early Ctrl-C still reaches teardown.
    let (stop_tx, stop_rx) = stop_signal(io::BufReader::new(io::stdin()));
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(StopReason::Interrupt);
    })
    .context("failed to install Ctrl-C handler")?;

    let kong = match Gateway::run(&client, &cfg.image, &customizers) {
        Ok(kong) => kong,
        Err(e) => {
            let message = e.to_string();
            if let Some(instance) = e.into_unready_instance() {
                dump_logs(&instance, &cfg);
            }
            bail!("failed to start gateway: {message}");
        }
    };

    let urls = kong.urls()?;
    println!("{}", serde_json::to_string_pretty(&urls)?);

    let logs = if args.no_logs {
        None
    } else {
        let consumer = kong.follow_logs()?;
        let rx = consumer.subscribe_with_backlog();
        let printer = std::thread::spawn(move || {
            for line in rx {
                eprintln!("{line}");
            }
        });
        Some((consumer, printer))
    };

    info!("gateway running; press Enter or Ctrl-C to stop");
    let reason = stop_rx.recv().unwrap_or(StopReason::Input);
    info!(?reason, "stopping gateway");

    if let Some((mut consumer, printer)) = logs {
        if let Err(e) = consumer.sync_and_wait(&Sentinel::unique(), cfg.sync_timeout()) {
            warn!(error = %e, "final log lines may be missing");
        }
        consumer.stop();
        let _ = printer.join();
    }
    kong.terminate().context("failed to remove gateway container")?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    /// A line or end of file on stdin.
    Input,
    Interrupt,
}

/// Channel that yields once `input` produces a line or closes. The sender
/// half is returned for other stop sources.
fn stop_signal<R: BufRead + Send + 'static>(input: R) -> (Sender<StopReason>, Receiver<StopReason>) {
    let (tx, rx) = mpsc::channel();
    let reader = tx.clone();
    std::thread::spawn(move || {
        let _ = input.lines().next();
        let _ = reader.send(StopReason::Input);
    });
    (tx, rx)
}

fn load_config(path: Option<&std::path::Path>) -> Result<HarnessConfig> {
    match path {
        Some(path) => {
            let mut cfg = config::load_file(path)?;
            cfg.apply_env_overrides(|key| std::env::var(key).ok());
            Ok(cfg)
        }
        None => config::load(&std::env::current_dir()?),
    }
}

fn parse_env_args(entries: &[String]) -> Result<Vec<Customizer>> {
    entries
        .iter()
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => Ok(Customizer::env(key, value)),
            None => bail!("--env expects KEY=VALUE, got {entry:?}"),
        })
        .collect()
}

/// Print what an unready container logged, then remove it.
fn dump_logs(instance: &ContainerInstance, cfg: &HarnessConfig) {
    match instance.follow_logs() {
        Ok(consumer) => {
            let _ = consumer.sync_and_wait(&Sentinel::unique(), cfg.sync_timeout());
            for line in consumer.lines() {
                eprintln!("{line}");
            }
        }
        Err(e) => warn!(error = %e, "could not read container output"),
    }
    if let Err(e) = instance.terminate() {
        warn!(error = %e, "cleanup failed");
    }
}
