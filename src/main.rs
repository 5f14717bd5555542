use anyhow::{Context, Result};
use clap::Parser;
use contagion_common::{BackendKind, CensusSnapshot, SimulationConfig};
use contagion_engine::{EpidemicSimulation, Recording};
use log::{debug, error, info, trace, warn};
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

/// Headless SEIR contagion run over moving agents.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Contact-tracing backend, overriding the configuration.
    #[arg(short, long, value_parser = parse_backend)]
    backend: Option<BackendKind>,

    /// Number of ticks to run (default: total_time_s / tick_seconds).
    #[arg(short, long)]
    ticks: Option<u64>,

    /// Replay a recording instead of starting from the configuration.
    #[arg(short, long)]
    replay: Option<PathBuf>,
}

fn parse_backend(s: &str) -> Result<BackendKind, String> {
    match s {
        "host" => Ok(BackendKind::Host),
        "parallel" => Ok(BackendKind::Parallel),
        other => Err(format!("unknown backend '{}', expected host or parallel", other)),
    }
}

fn main() -> Result<()> {
    // Initialize the logger
    env_logger::init();
    let args = Args::parse();

    info!("Starting contagion engine...");

    // --- Initialize Simulation ---
    let mut sim = match &args.replay {
        Some(path) => {
            let mut recording = Recording::load(path)?;
            if let Some(kind) = args.backend {
                recording.initial_state.backend.kind = kind;
            }
            EpidemicSimulation::from_recording(recording)?
        }
        None => {
            let mut config = SimulationConfig::load(&args.config)?;
            if let Some(kind) = args.backend {
                config.backend.kind = kind;
            }
            EpidemicSimulation::new(config)?
        }
    };
    for (key, value) in sim.summary() {
        info!("  {:<26} {}", key, value);
    }
    debug!("Simulation Parameters: {:#?}", sim.params());

    // --- Simulation Loop ---
    let params = sim.params().clone();
    let total_steps = args
        .ticks
        .unwrap_or_else(|| (sim.config().timing.total_time_s / params.dt).ceil() as u64);
    let record_interval_s = sim.config().timing.record_interval_s.max(0.0);
    let mut record_interval_steps = (record_interval_s / params.dt).round() as u64;
    if record_interval_steps == 0 {
        warn!(
            "Record interval ({:.3} s) is smaller than the tick ({:.3} s). Recording every tick.",
            record_interval_s, params.dt
        );
        record_interval_steps = 1;
    }
    info!(
        "Recording snapshot every {} ticks ({:.2} s).",
        record_interval_steps,
        record_interval_steps as f32 * params.dt
    );

    info!("Starting simulation loop for {} ticks on the {} backend...", total_steps, sim.backend_name());
    let start_time = Instant::now();
    let mut previous_print_time = start_time;

    sim.record_snapshot();

    for step in 0..total_steps {
        let step_start_time = Instant::now();
        let report = match sim.step() {
            Ok(report) => report,
            Err(e) => {
                error!("Error during tick {}: {:#}", step + 1, e);
                anyhow::bail!("Simulation step failed.");
            }
        };
        let step_duration = step_start_time.elapsed();

        let current_time = Instant::now();
        let should_print_status = current_time.duration_since(previous_print_time).as_secs_f64() >= 5.0;
        let is_record_step = (step + 1) % record_interval_steps == 0;
        let is_last_step = step + 1 == total_steps;

        if should_print_status || is_record_step || is_last_step {
            let [s, e, i, r] = sim.census().counts();
            info!(
                "Tick [{}/{}] ({:.2} s) | S {} E {} I {} R {} | +{} exposed | Step Time: {:6.2} ms",
                report.tick,
                total_steps,
                sim.elapsed_seconds(),
                s,
                e,
                i,
                r,
                report.newly_exposed,
                step_duration.as_secs_f64() * 1000.0
            );
            previous_print_time = current_time;

            if is_record_step || is_last_step {
                sim.record_snapshot();
            }
        } else {
            trace!("Tick [{}/{}] completed in {:.2} ms", step + 1, total_steps, step_duration.as_secs_f64() * 1000.0);
        }
    }

    let total_duration = start_time.elapsed();
    info!("Simulation finished in {:.3} seconds.", total_duration.as_secs_f64());
    if sim.grid().dropped_total() > 0 {
        warn!(
            "{} infectious insertions were dropped by full grid cells; consider raising max_agents_per_cell.",
            sim.grid().dropped_total()
        );
    }

    // --- Save Recorded Data ---
    let output = sim.config().output.clone();
    if output.save_stats {
        let format = output.format.as_deref().unwrap_or("json");
        if let Err(e) = save_snapshots(sim.get_recorded_snapshots(), &output.base_filename, format) {
            error!("Error saving snapshots: {:#}", e);
        }
    } else {
        info!("Skipping saving snapshots as per config (save_stats is false).");
    }

    if output.save_positions {
        let filename = format!("{}_final_positions.csv", output.base_filename);
        save_final_positions(&sim, &filename)?;
        info!("Final positions saved to {}", filename);
    }

    if let Some(recording) = sim.finish_recording() {
        let filename = format!("{}_recording.json", output.base_filename);
        match recording.save(&filename) {
            Ok(()) => info!("Recording saved to {}", filename),
            Err(e) => error!("Error saving recording: {:#}", e),
        }
    }

    info!("Simulation Complete.");
    Ok(())
}

fn save_snapshots(snapshots: &[CensusSnapshot], base_filename: &str, format: &str) -> Result<()> {
    match format {
        "bincode" => {
            let filename = format!("{}_snapshots.bin", base_filename);
            let file = File::create(&filename).with_context(|| format!("creating '{}'", filename))?;
            bincode::serialize_into(file, snapshots).context("serializing snapshots to bincode")?;
            info!("{} snapshots saved to {} (binary format)", snapshots.len(), filename);
        }
        "messagepack" => {
            let filename = format!("{}_snapshots.msgpack", base_filename);
            let mut file = File::create(&filename).with_context(|| format!("creating '{}'", filename))?;
            rmp_serde::encode::write(&mut file, snapshots).context("serializing snapshots to MessagePack")?;
            info!("{} snapshots saved to {} (MessagePack format)", snapshots.len(), filename);
        }
        other => {
            if other != "json" {
                error!("Unknown output format: {}. Using JSON instead.", other);
            }
            let filename = format!("{}_snapshots.json", base_filename);
            let json_string = serde_json::to_string(snapshots).context("serializing snapshots to JSON")?;
            let mut file = File::create(&filename).with_context(|| format!("creating '{}'", filename))?;
            file.write_all(json_string.as_bytes())
                .with_context(|| format!("writing '{}'", filename))?;
            info!("{} snapshots saved to {}", snapshots.len(), filename);
        }
    }
    Ok(())
}

fn save_final_positions(sim: &EpidemicSimulation, filename: &str) -> Result<()> {
    let mut writer = csv::Writer::from_path(filename)?;
    writer.write_record(["x", "y", "state"])?;
    for ((x, y), state) in sim.get_results().into_iter().zip(sim.states()) {
        writer.write_record(&[format!("{:.4}", x), format!("{:.4}", y), state.label().to_string()])?;
    }
    writer.flush()?;
    Ok(())
}
