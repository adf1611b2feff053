use anyhow::Result;
use clipforge::config::Config;
use clipforge::{convert, images, init, pipeline};

fn print_usage() {
    eprintln!("Usage: clipforge <job>");
    eprintln!();
    eprintln!("Jobs:");
    eprintln!("  combine     random clip sequence -> overlay -> music mix -> final video");
    eprintln!("  fix-rates   normalize audio sample rate/codec across a directory tree");
    eprintln!("  images      batch image conversion over a worker pool");
    eprintln!("  tts         synthesize narration for queued text files");
    eprintln!("  mastermind  generate commentary, split voices, then run tts");
    eprintln!();
    eprintln!("Configuration is read from config.json in the working directory.");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let job = match std::env::args().nth(1) {
        Some(job) => job,
        None => {
            print_usage();
            std::process::exit(2);
        }
    };

    let cfg = Config::load("config.json").await?;
    init::ensure_directories(&cfg).await?;

    if !init::check_ffmpeg().await {
        eprintln!("[WARNING] FFmpeg not found in PATH. Please install FFmpeg.");
    }

    match job.as_str() {
        "combine" => {
            let produced = pipeline::run_combiner(&cfg).await?;
            if produced == 0 {
                std::process::exit(1);
            }
        }
        "fix-rates" => {
            convert::run_fix_rates(&cfg.converter).await?;
        }
        "images" => {
            images::run_images(&cfg.images).await?;
        }
        "tts" => {
            pipeline::run_tts(&cfg).await?;
        }
        "mastermind" => {
            pipeline::run_mastermind(&cfg).await?;
        }
        other => {
            eprintln!("Unknown job: {}", other);
            print_usage();
            std::process::exit(2);
        }
    }

    Ok(())
}
