//! destilar CLI
//!
//! Single-command entry point: parse the run flags, build the data pipeline
//! and the dual networks, then train until the epoch horizon.
//!
//! ```bash
//! destilar --data_path /data/imagenet --output_dir runs/base
//! destilar --arch vit_tiny --epochs 20 --local_crops_number 4 --use_fp16 false
//! ```

use clap::Parser;
use destilar::cli::{run, Cli};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
