mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use audiofft::analysis::metrics::MetricSpec;
use audiofft::audio::cpal_host::CpalHost;
use audiofft::audio::device::{AudioHost, DeviceInfo};
use audiofft::audio::synthetic::{SyntheticDevice, SyntheticHost};
use audiofft::config::{self, Config};
use audiofft::pipeline::scheduler::IntervalTimer;
use audiofft::publish::{bin_key, TIMESTAMP_KEY};
use audiofft::{Controller, PipelineConfig, PipelineStatus, SharedProperties, TickOutcome};
use cli::{Cli, Command, RunArgs};

#[derive(Serialize)]
struct Report {
    status: PipelineStatus,
    properties: BTreeMap<String, f32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Devices { json } => list_devices(json),
        Command::Run(args) => run(args),
    }
}

fn list_devices(json: bool) -> Result<()> {
    let timer = IntervalTimer::new();
    let mut controller = Controller::new(
        Box::new(CpalHost::new()),
        Box::new(timer.handle()),
        Box::new(SharedProperties::new()),
    );
    let devices = controller.list_devices();
    if let Some(err) = controller.status().error_message {
        anyhow::bail!(err);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!("No input devices found");
        return Ok(());
    }
    println!("Input devices:");
    for device in &devices {
        println!("  {}", describe(device));
    }
    Ok(())
}

fn describe(device: &DeviceInfo) -> String {
    let mut line = format!(
        "[{}] {:<40} {} ch, {} Hz",
        device.index, device.name, device.max_input_channels, device.default_sample_rate
    );
    if device.is_default {
        line.push_str("  (default)");
    }
    if device.is_loopback() {
        line.push_str("  (loopback)");
    }
    line
}

/// File config with CLI flags layered on top.
fn resolve_config(args: &RunArgs) -> Result<(Option<usize>, PipelineConfig)> {
    let file = match config::find_config_path(args.config.as_deref()) {
        Some(path) => match config::load_config(&path) {
            Ok(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            // A file named on the command line must load
            Err(err) if args.config.is_some() => return Err(err),
            Err(err) => {
                log::warn!("Ignoring config {}: {:#}", path.display(), err);
                Config::default()
            }
        },
        None => Config::default(),
    };

    let mut pipeline = file.pipeline();
    if let Some(sample_rate) = args.sample_rate {
        pipeline.sample_rate = sample_rate;
    }
    if let Some(block_size) = args.block_size {
        pipeline.block_size = block_size;
        if file.analysis.window_size.is_none() {
            pipeline.window_size = block_size;
        }
    }
    if let Some(window_size) = args.window_size {
        pipeline.window_size = window_size;
    }
    if let Some(bins) = args.bins {
        pipeline.num_bins = bins;
    }
    if let Some(tick_ms) = args.tick_ms {
        pipeline.tick_interval_ms = tick_ms;
    }

    Ok((args.device.or(file.capture.device), pipeline))
}

fn run(args: RunArgs) -> Result<()> {
    let (device, pipeline) = resolve_config(&args)?;
    let num_bins = pipeline.num_bins;

    let (host, device): (Box<dyn AudioHost>, Option<usize>) = match args.tone {
        Some(hz) => {
            log::info!("Using synthetic {} Hz tone (amplitude {})", hz, args.amplitude);
            let tone = SyntheticDevice::tone(&format!("Synthetic {} Hz", hz), hz, args.amplitude)
                .with_sample_rate(pipeline.sample_rate);
            (Box::new(SyntheticHost::new(vec![tone])), Some(0))
        }
        None => (Box::new(CpalHost::new()), device),
    };

    let timer = IntervalTimer::new();
    let props = SharedProperties::new();
    let mut controller = Controller::new(host, Box::new(timer.handle()), Box::new(props.clone()));
    controller
        .start(device, pipeline)
        .context("Failed to start capture")?;
    let preview = controller.preview();

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));

    let deadline = args.duration.map(|duration| Instant::now() + duration);
    let mut failed = false;
    while let Some(dt) = timer.wait_next() {
        if controller.tick(dt) == TickOutcome::CaptureFailed {
            failed = true;
            break;
        }
        pb.set_message(preview.summary());
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
    }
    pb.finish_and_clear();

    if timer.missed() > 0 {
        log::warn!("{} ticks skipped because analysis overran", timer.missed());
    }
    controller.stop();
    let status = controller.status();

    if args.json {
        let report = Report {
            status: status.clone(),
            properties: props.snapshot(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_properties(&props, num_bins);
        println!(
            "\n{} ticks ({} skipped) from {}",
            status.ticks,
            status.skipped_ticks,
            status.device_name.as_deref().unwrap_or("?")
        );
    }

    if failed {
        anyhow::bail!(status
            .error_message
            .unwrap_or_else(|| "capture failed".to_string()));
    }
    Ok(())
}

fn print_properties(props: &SharedProperties, num_bins: usize) {
    let values = props.snapshot();
    let spec = MetricSpec::standard(num_bins);
    let bins = (0..num_bins).map(bin_key);
    let metrics = spec.names().map(String::from);
    for key in bins.chain(metrics).chain([TIMESTAMP_KEY.to_string()]) {
        if let Some(value) = values.get(&key) {
            println!("{:<18} {:>9.4}", key, value);
        }
    }
}
