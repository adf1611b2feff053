use crate::config::MetadataConfig;
use crate::ffmpeg;
use crate::logok;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::fs;

static UNSAFE_CHARS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9 _\-]").unwrap());

/// Bracketed duration tag for the final filename: minutes up to two hours,
/// whole hours beyond.
pub fn duration_label(target_s: f64) -> String {
    if target_s < 2.0 * 3600.0 {
        let minutes = (target_s / 60.0).round().max(1.0) as i64;
        format!("[{}m]", minutes)
    } else {
        let hours = (target_s / 3600.0).floor() as i64;
        format!("[{}Hours]", hours)
    }
}

pub fn sanitize_token(token: &str) -> String {
    UNSAFE_CHARS_RE.replace_all(token, "").trim().to_string()
}

/// First `n` whitespace-separated words of a file stem, used as a
/// descriptive token (e.g. the music track a run was mixed with).
pub fn first_words(path: &Path, n: usize) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.split_whitespace()
        .take(n)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn final_name(
    slug: &str,
    target_s: f64,
    tokens: &[String],
    stamp: DateTime<Local>,
    iteration: u32,
) -> String {
    let mut name = duration_label(target_s);
    for token in tokens {
        let clean = sanitize_token(token);
        if !clean.is_empty() {
            name.push_str(&format!("[{}]", clean));
        }
    }
    name.push_str(&format!(
        "{}_{}_{}.mp4",
        sanitize_token(slug),
        stamp.format("%Y%m%d_%H%M%S"),
        iteration
    ));
    name
}

/// Everything the final stage needs for one iteration.
pub struct FinalizeJob<'a> {
    pub video: &'a Path,
    pub audio: &'a Path,
    pub target_s: f64,
    pub shortest: bool,
    pub work_dir: &'a Path,
    pub output_dir: &'a Path,
    pub slug: &'a str,
    pub tokens: Vec<String>,
    pub iteration: u32,
    pub metadata: Option<&'a MetadataConfig>,
}

/// Muxes the composited video and mixed audio, trims to the exact target
/// duration, stamps metadata, and renames to the timestamped final name.
/// Intermediates are removed on both the success and the failure path.
pub async fn finalize(job: FinalizeJob<'_>) -> Result<PathBuf> {
    let muxed = job.work_dir.join(format!("muxed_{}.mp4", job.iteration));
    let trimmed = job.work_dir.join(format!("trimmed_{}.mp4", job.iteration));

    let mux_ok = ffmpeg::mux_streams(job.video, job.audio, job.shortest, &muxed).await?;
    if !mux_ok {
        anyhow::bail!("Mux produced no output for iteration {}", job.iteration);
    }

    let trim_result = ffmpeg::trim_copy(&muxed, job.target_s, &trimmed).await;
    let _ = fs::remove_file(&muxed).await;
    if !trim_result? {
        let _ = fs::remove_file(&trimmed).await;
        anyhow::bail!("Trim produced no output for iteration {}", job.iteration);
    }

    if let Some(meta) = job.metadata {
        if let Err(err) = ffmpeg::tag_metadata(&trimmed, meta).await {
            let _ = fs::remove_file(&trimmed).await;
            return Err(err).with_context(|| {
                format!("Metadata stamping failed for iteration {}", job.iteration)
            });
        }
    }

    fs::create_dir_all(job.output_dir).await.ok();
    let name = final_name(
        job.slug,
        job.target_s,
        &job.tokens,
        Local::now(),
        job.iteration,
    );
    let final_path = job.output_dir.join(name);
    fs::rename(&trimmed, &final_path)
        .await
        .with_context(|| format!("Failed to move final video to {}", final_path.display()))?;

    logok(format!("Final video created: {}", final_path.display()));
    Ok(final_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn duration_labels_match_known_targets() {
        assert_eq!(duration_label(59.0), "[1m]");
        assert_eq!(duration_label(90.0), "[2m]");
        assert_eq!(duration_label(599.0), "[10m]");
        assert_eq!(duration_label(1800.0), "[30m]");
        assert_eq!(duration_label(3600.0), "[60m]");
        assert_eq!(duration_label(23795.0), "[6Hours]");
    }

    #[test]
    fn final_name_carries_label_tokens_and_timestamp() {
        let stamp = Local.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap();
        let name = final_name(
            "Quotes_Video",
            599.0,
            &["Random".to_string(), "Ocean Waves".to_string()],
            stamp,
            3,
        );
        assert_eq!(
            name,
            "[10m][Random][Ocean Waves]Quotes_Video_20260314_150926_3.mp4"
        );
    }

    #[test]
    fn tokens_are_sanitized_for_filenames() {
        assert_eq!(sanitize_token("Ocean/Waves: vol.1"), "OceanWaves vol1");
        assert_eq!(sanitize_token("  plain  "), "plain");

        let stamp = Local.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let name = final_name("Video", 59.0, &["???".to_string()], stamp, 0);
        // A token that sanitizes to nothing is dropped entirely.
        assert_eq!(name, "[1m]Video_20260101_000000_0.mp4");
    }

    #[test]
    fn first_words_takes_leading_stem_words() {
        let path = Path::new("music/58 mins Sub-Conscious Sleep.mp3");
        assert_eq!(first_words(path, 2), "58 mins");
        assert_eq!(first_words(Path::new("single.mp3"), 2), "single");
    }
}
