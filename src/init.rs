use crate::config::Config;
use anyhow::Result;
use std::path::PathBuf;
use tokio::fs;

/// Creates every directory the configured jobs read from or write to.
pub async fn ensure_directories(cfg: &Config) -> Result<()> {
    let mut dirs: Vec<PathBuf> = vec![
        cfg.combiner.background_dir.clone(),
        cfg.combiner.foreground_dir.clone(),
        cfg.combiner.music_dir.clone(),
        cfg.combiner.output_dir.clone(),
        cfg.combiner.work_dir.clone(),
        cfg.converter.input_dir.clone(),
        cfg.converter.output_dir.clone(),
        cfg.images.input_dir.clone(),
        cfg.images.output_dir.clone(),
        cfg.tts.text_dir.clone(),
        cfg.tts.audio_dir.clone(),
        cfg.tts.processed_text_dir.clone(),
        cfg.tts.processed_audio_dir.clone(),
        cfg.tts.final_dir.clone(),
        cfg.mastermind.inbox_dir.clone(),
        cfg.mastermind.generated_dir.clone(),
        cfg.mastermind.processed_dir.clone(),
    ];
    if let Some(title_dir) = &cfg.combiner.title_dir {
        dirs.push(title_dir.clone());
    }

    for dir in dirs {
        if !dir.exists() {
            fs::create_dir_all(&dir).await?;
            eprintln!("[INFO] Created directory: {}", dir.display());
        }
    }
    Ok(())
}

pub async fn check_ffmpeg() -> bool {
    match tokio::process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await
    {
        Ok(output) => output.status.success(),
        Err(_) => false,
    }
}
