// src/bin/tfeval-niqe-fit.rs
//
// Fits a pristine NIQE model from a directory of clean images.

use clap::Parser;
use log::{info, warn, error, LevelFilter};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tfeval::metrics::niqe::{LumaPlane, NiqeModel};
use tfeval::{EvalError, Result};

#[derive(Parser, Debug)]
#[command(author, version, about = "Fit a pristine NIQE model for tfeval", long_about = None)]
struct FitArgs {
    /// Directory of pristine PNG/JPEG images
    #[arg(long, value_name = "DIR")]
    images: PathBuf,

    /// Output model file (JSON)
    #[arg(long, value_name = "PATH")]
    out: PathBuf,
}

fn main() -> ExitCode {
    let args = FitArgs::parse();
    let logger = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{} {}] {}", record.level(), record.target(), message))
        })
        .level(LevelFilter::Info)
        .chain(std::io::stderr())
        .apply();
    if let Err(e) = logger {
        eprintln!("Error setting up logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Model fitting failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &FitArgs) -> Result<()> {
    let paths = image_paths(&args.images)?;
    let mut planes = Vec::with_capacity(paths.len());
    for path in &paths {
        match image::open(path) {
            Ok(img) => planes.push(LumaPlane::from_rgb(&img.to_rgb8())),
            Err(e) => warn!("Skipping unreadable image {}: {}", path.display(), e),
        }
    }
    if planes.is_empty() {
        return Err(EvalError::EmptyResult(args.images.clone()));
    }

    let model = NiqeModel::fit(&planes)?;
    model.save(&args.out)?;
    info!("Wrote NIQE model to {}", args.out.display());
    Ok(())
}

fn image_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(EvalError::Input(format!("image directory not found: {}", dir.display())));
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"));
        if is_image {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}
