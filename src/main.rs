use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    thread,
    time::Instant,
};

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};

use sign_interpreter::{
    Config, InterpreterController, TickOutcome,
    gesture::ort_model_loader,
    pipeline::{CameraBackend, Classifier, HandposeExtractor, NokhwaBackend},
    teach,
};

/// Sign recognition and teaching from a local camera
#[derive(Parser)]
#[command(name = "sign-interpreter", version, about)]
struct Cli {
    /// TOML config file overriding the defaults
    #[arg(long, env = "SIGN_INTERPRETER_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List capture devices
    Cameras,
    /// Recognize signs and print each new prediction
    Interpret {
        /// Camera index
        #[arg(long)]
        camera: Option<u32>,
        /// Draw the skeleton overlay
        #[arg(long)]
        overlay: bool,
        /// Write the last overlay to this PNG when done
        #[arg(long, requires = "overlay")]
        snapshot: Option<PathBuf>,
        /// Recognize the signs in this exported dataset instead of the ONNX classifier
        #[arg(long)]
        templates: Option<PathBuf>,
        /// Stop after this many frames
        #[arg(long)]
        frames: Option<u64>,
    },
    /// Record one labelled sample and add it to a dataset file
    Teach {
        /// Sign label
        #[arg(long)]
        label: String,
        /// Sample category
        #[arg(long)]
        category: Option<String>,
        /// Frames to record
        #[arg(long, default_value = "30")]
        frames: usize,
        /// Camera index
        #[arg(long)]
        camera: Option<u32>,
        /// Dataset file; existing samples are kept
        #[arg(long)]
        out: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("fatal: {err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Command::Cameras => list_cameras(),
        Command::Interpret {
            camera,
            overlay,
            snapshot,
            templates,
            frames,
        } => interpret(config, camera, overlay, snapshot, templates, frames),
        Command::Teach {
            label,
            category,
            frames,
            camera,
            out,
        } => teach_sign(config, &label, category, frames, camera, &out),
    }
}

fn list_cameras() -> anyhow::Result<()> {
    let devices = NokhwaBackend.devices()?;
    if devices.is_empty() {
        println!("no cameras found");
    }
    for device in devices {
        println!("{}: {}", device.index, device.label);
    }
    Ok(())
}

fn build_controller(config: Config, camera: Option<u32>) -> anyhow::Result<InterpreterController> {
    let extractor =
        HandposeExtractor::new(&config.extractor).context("failed to prepare hand tracking")?;
    let classifier = Classifier::new(ort_model_loader(config.classifier.clone()));
    let mut controller = InterpreterController::new(
        config,
        Arc::new(NokhwaBackend),
        Box::new(extractor),
        classifier,
    );
    if let Some(index) = camera {
        controller.select_camera(index)?;
    }
    Ok(controller)
}

fn interpret(
    config: Config,
    camera: Option<u32>,
    overlay: bool,
    snapshot: Option<PathBuf>,
    templates: Option<PathBuf>,
    frames: Option<u64>,
) -> anyhow::Result<()> {
    let interval = config.pipeline.frame_interval();
    let mut controller = build_controller(config, camera)?;
    controller.set_overlay_enabled(overlay);

    if let Some(path) = templates {
        let dataset = teach::import_from_path(&path)
            .with_context(|| format!("failed to read dataset {}", path.display()))?;
        controller.restore_dataset(dataset)?;
        let labels = controller.adopt_taught_signs()?;
        println!("recognizing {labels} taught signs from {}", path.display());
    }

    controller.activate_camera()?;
    if let Err(err) = controller.wait_model_ready() {
        log::warn!("classifier unavailable, tracking only: {err}");
    }

    let mut shown: Option<String> = None;
    let mut processed = 0u64;
    while frames.is_none_or(|limit| processed < limit) {
        let started = Instant::now();
        match controller.tick() {
            TickOutcome::Inactive => break,
            TickOutcome::DeviceLost { reason, .. } => bail!("camera lost: {reason}"),
            TickOutcome::Skipped => {}
            TickOutcome::NoSubject | TickOutcome::Processed { .. } => processed += 1,
        }

        if let Some(prediction) = controller.current_prediction() {
            if shown.as_deref() != Some(prediction.label.as_str()) {
                println!("{}", prediction.display_text());
                shown = Some(prediction.label.clone());
            }
        }

        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }

    if let Some(path) = snapshot {
        controller
            .overlay_surface()
            .save(&path)
            .with_context(|| format!("failed to write overlay {}", path.display()))?;
    }
    controller.deactivate_camera()?;
    Ok(())
}

fn teach_sign(
    config: Config,
    label: &str,
    category: Option<String>,
    frames: usize,
    camera: Option<u32>,
    out: &Path,
) -> anyhow::Result<()> {
    let interval = config.pipeline.frame_interval();
    let category = category.unwrap_or_else(|| config.recorder.default_category.clone());
    let mut controller = build_controller(config, camera)?;

    if out.exists() {
        let dataset = teach::import_from_path(out)
            .with_context(|| format!("failed to read dataset {}", out.display()))?;
        controller.restore_dataset(dataset)?;
    }

    controller.activate_camera()?;
    controller.start_recording(label)?;
    println!("recording {label:?}, hold the sign");

    while controller.record_count() < frames {
        let started = Instant::now();
        match controller.tick() {
            TickOutcome::Inactive => break,
            TickOutcome::DeviceLost { reason, .. } => {
                controller.export_dataset_to(out)?;
                bail!("camera lost while recording, partial sample saved: {reason}");
            }
            _ => {}
        }
        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }

    let summary = controller.stop_recording(label, &category)?;
    controller.deactivate_camera()?;
    let bytes = controller.export_dataset_to(out)?;
    println!(
        "saved sample {} ({} frames) to {} [{} samples, {bytes} bytes]",
        summary.id,
        summary.frames,
        out.display(),
        controller.dataset().len()
    );
    Ok(())
}
