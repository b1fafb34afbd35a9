use log::{info, error, LevelFilter};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;
use chrono::Local;
use tfeval::cli::{self, CliArgs};
use tfeval::{eval, plot, report, MetricEngine, Result};

fn main() -> ExitCode {
    let start_time = Instant::now();
    let args = cli::parse_args();

    if let Err(e) = setup_logging(&args) {
        eprintln!("Error setting up logging: {}", e);
        return ExitCode::FAILURE;
    }

    info!("Starting tfeval...");
    info!("Arguments: {:?}", args);

    match run(&args) {
        Ok(()) => {
            info!("Evaluation completed successfully in {:.2?}", start_time.elapsed());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Evaluation failed after {:.2?}: {}", start_time.elapsed(), e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Sets up logging to stderr and optionally to a file. Stdout carries the report only.
fn setup_logging(args: &CliArgs) -> std::result::Result<(), fern::InitError> {
    let base_config = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(LevelFilter::Info)
        .level_for("tfeval", LevelFilter::Debug);

    let console_config = fern::Dispatch::new().chain(std::io::stderr());
    let mut logger = base_config.chain(console_config);

    let mut log_path = None;
    if args.log {
        let log_filename = format!("tfeval_{}.log", Local::now().format("%Y%m%d_%H%M%S"));
        let path = args.log_dir.clone().unwrap_or_else(|| PathBuf::from(".")).join(log_filename);
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        logger = logger.chain(fern::Dispatch::new().chain(fern::log_file(&path)?));
        log_path = Some(path);
    }

    logger.apply()?;
    if let Some(path) = log_path {
        info!("Logging to file: {}", path.display());
    }
    Ok(())
}

fn run(args: &CliArgs) -> Result<()> {
    info!("Ground truth: {}", args.gt_video.display());
    info!("Prediction: {}", args.pred_video.display());

    let request = args.to_request();
    let engine = MetricEngine::standard(&args.backend_settings());
    let evaluation = eval::evaluate(&request, &engine)?;
    info!("Scored {} aligned frames (SSIM backend: {})", evaluation.frames, evaluation.ssim_backend);

    report::sanity_check(&evaluation.metrics);
    report::emit(&evaluation.metrics, args.out_json.as_deref())?;

    if let Some(dir) = &args.plot_dir {
        for path in plot::plot_evaluation(&evaluation, dir)? {
            info!("Generated plot: {}", path.display());
        }
    }
    Ok(())
}
