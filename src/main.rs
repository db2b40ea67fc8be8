use std::error::Error;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use gimbal_rs::config::CALIBRATION_ATTEMPTS;
use gimbal_rs::{
    CalibrationSession, ChannelPrompt, CommandVector, GimbalConfig, GimbalController,
    OperatorInput, RppalPulseOutput,
};

#[derive(Parser)]
#[command(name = "gimbal-rs")]
#[command(version)]
#[command(about = "Drives a pan/tilt servo gimbal from normalized command vectors", long_about = None)]
struct Args {
    /// Channel configuration (TOML). Built-in pan/tilt defaults when omitted
    #[arg(short, long, env = "GIMBAL_CONFIG")]
    config: Option<PathBuf>,

    /// Run the interactive calibration and print a config snippet
    #[arg(long, default_value_t = false)]
    calibrate: bool,

    /// Drive every servo to min, mid and max once, then exit
    #[arg(long, default_value_t = false, conflicts_with = "calibrate")]
    exercise: bool,

    /// Stop after this many command vectors instead of at end of input
    #[arg(short, long)]
    num_frames: Option<usize>,

    /// Bad answers retried per channel during calibration before giving up
    #[arg(long, default_value_t = CALIBRATION_ATTEMPTS)]
    attempts: usize,

    /// Override the configured settle time after each move (ms)
    #[arg(long)]
    settle_ms: Option<u64>,
}

// Usage:
//  policy | gimbal-rs --config gimbal.toml
//    one line per control cycle, one value in [0, 1] per channel: "0.42, 0.61"
//  gimbal-rs --config gimbal.toml --calibrate > snippet.toml
//    answers go to stdin, the snippet to stdout
fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "gimbal_rs=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => GimbalConfig::load(path)?,
        None => GimbalConfig::default(),
    };
    if let Some(settle_ms) = args.settle_ms {
        config.settle_ms = settle_ms;
    }

    // Ctrl+C must end every mode through a normal return so the lines are
    // released, never through the default SIGINT exit.
    let stop = Arc::new(AtomicBool::new(false));
    let (tx, rx) = mpsc::channel();
    {
        let stop = Arc::clone(&stop);
        let tx = tx.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::Release);
            let _ = tx.send(OperatorInput::Interrupted);
        })?;
    }

    // Every line is released when `gimbal` goes out of scope, on any return.
    let mut gimbal = GimbalController::from_config(&config, |_| RppalPulseOutput::new())?;
    info!(channels = gimbal.len(), "gimbal ready");

    if args.calibrate {
        spawn_stdin_reader(tx);
        return calibrate(&mut gimbal, ChannelPrompt::stderr(rx), args.attempts);
    }

    gimbal.home()?;
    if args.exercise {
        gimbal.exercise(Duration::from_secs(1), &stop)?;
        return Ok(());
    }

    spawn_stdin_reader(tx);
    run(&mut gimbal, &rx, args.num_frames)
}

/// Blocking stdin reads happen off the control thread so that a Ctrl+C
/// can reach the loop while it waits for input. The reader never touches
/// a channel.
fn spawn_stdin_reader(tx: Sender<OperatorInput>) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let input = match line {
                Ok(line) => OperatorInput::Line(line),
                Err(e) => OperatorInput::Failed(e),
            };
            let failed = matches!(input, OperatorInput::Failed(_));
            if tx.send(input).is_err() || failed {
                return;
            }
        }
        let _ = tx.send(OperatorInput::Closed);
    });
}

fn calibrate(
    gimbal: &mut GimbalController<RppalPulseOutput>,
    prompt: ChannelPrompt<io::Stderr>,
    attempts: usize,
) -> Result<(), Box<dyn Error>> {
    eprintln!("Calibration");
    eprintln!("Each servo is centered, then driven to its minimum and maximum.");
    eprintln!("At each end, enter the angle you observe and the clip you want to keep.\n");

    let report = CalibrationSession::new(gimbal, prompt)
        .with_attempts(attempts)
        .run();

    print!("{}", report.snippet()?);
    for failure in &report.failures {
        eprintln!("not calibrated: {failure}");
    }

    if report.is_complete() {
        Ok(())
    } else {
        Err(format!("{} channel(s) not calibrated", report.failures.len()).into())
    }
}

fn run(
    gimbal: &mut GimbalController<RppalPulseOutput>,
    rx: &Receiver<OperatorInput>,
    num_frames: Option<usize>,
) -> Result<(), Box<dyn Error>> {
    info!("control loop started");
    let mut frames = 0;
    while num_frames.is_none_or(|limit| frames < limit) {
        let line = match rx.recv() {
            Ok(OperatorInput::Line(line)) => line,
            Ok(OperatorInput::Failed(e)) => return Err(e.into()),
            Ok(OperatorInput::Closed | OperatorInput::Interrupted) | Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let vector = CommandVector::parse(&line)?;
        let states = gimbal.update(&vector)?;
        frames += 1;

        let angles: Vec<String> = states
            .iter()
            .map(|s| format!("{:.1}", s.current_angle))
            .collect();
        info!("Iteration #{frames}: actions={vector} angles=[{}]", angles.join(", "));
    }

    info!(frames, "control loop stopped");
    Ok(())
}
