use crate::config::ImagesConfig;
use crate::ffmpeg;
use crate::{logok, logw};
use anyhow::Result;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use walkdir::WalkDir;

const IMAGE_EXTS: &[&str] = &["png", "jpg", "jpeg", "webp", "avif", "bmp", "tiff"];

/// Mirrors the input-relative path into the output tree with the target
/// extension.
pub fn output_path_for(
    input: &Path,
    input_root: &Path,
    output_root: &Path,
    format: &str,
) -> PathBuf {
    let rel = input.strip_prefix(input_root).unwrap_or(input);
    output_root.join(rel).with_extension(format.to_lowercase())
}

/// The images job: converts every image under the input tree to the target
/// format. Conversions are independent per file, so they fan out over a
/// fixed-size worker pool; workers share nothing but the task list.
pub async fn run_images(cfg: &ImagesConfig) -> Result<usize> {
    let mut inputs = Vec::new();
    for entry in WalkDir::new(&cfg.input_dir).min_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        let matched = path
            .extension()
            .and_then(OsStr::to_str)
            .map(|e| IMAGE_EXTS.iter().any(|want| e.eq_ignore_ascii_case(want)))
            .unwrap_or(false);
        if matched {
            inputs.push(path);
        }
    }

    if inputs.is_empty() {
        logw(format!("No images found in {}", cfg.input_dir.display()));
        return Ok(0);
    }

    // Directories are created up front so workers never race on mkdir.
    for input in &inputs {
        let out = output_path_for(input, &cfg.input_dir, &cfg.output_dir, &cfg.format);
        if let Some(parent) = out.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let limit = Arc::new(Semaphore::new(cfg.workers.max(1)));
    let mut workers = JoinSet::new();
    for input in inputs {
        let out = output_path_for(&input, &cfg.input_dir, &cfg.output_dir, &cfg.format);
        let permit = Arc::clone(&limit);
        workers.spawn(async move {
            let _slot = permit.acquire_owned().await;
            match ffmpeg::convert_image(&input, &out).await {
                Ok(true) => Ok((input, out)),
                Ok(false) => Err(format!("No output written for {}", input.display())),
                Err(err) => Err(format!("Failed to convert {}: {}", input.display(), err)),
            }
        });
    }

    let mut converted = 0usize;
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Ok((input, out))) => {
                logok(format!("Converted: {} -> {}", input.display(), out.display()));
                converted += 1;
            }
            Ok(Err(msg)) => logw(msg),
            Err(err) => logw(format!("Image worker panicked: {}", err)),
        }
    }

    logok(format!("images done: {} converted", converted));
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirrors_relative_layout_with_new_extension() {
        let out = output_path_for(
            Path::new("in/posters/a.webp"),
            Path::new("in"),
            Path::new("out"),
            "jpg",
        );
        assert_eq!(out, PathBuf::from("out/posters/a.jpg"));
    }

    #[test]
    fn format_is_lowercased_in_output() {
        let out = output_path_for(Path::new("in/a.png"), Path::new("in"), Path::new("out"), "JPG");
        assert_eq!(out, PathBuf::from("out/a.jpg"));
    }
}
