use crate::config::ConverterConfig;
use crate::ffmpeg::{self, AudioSpec};
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::Path;
use tokio::fs;
use walkdir::WalkDir;

const MEDIA_EXTS: &[&str] = &["mp4", "mkv", "mov", "avi", "mp3", "wav", "m4a"];

/// How to make a clip comply with a target audio spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertPlan {
    /// Already compliant; copy the file byte-for-byte.
    Copy,
    /// One transcode producing a compliant copy.
    Transcode,
}

impl ConvertPlan {
    pub fn for_specs(probed: &AudioSpec, target: &AudioSpec) -> Self {
        if probed.sample_rate == target.sample_rate && probed.codec == target.codec {
            ConvertPlan::Copy
        } else {
            ConvertPlan::Transcode
        }
    }
}

pub async fn apply_plan(
    plan: ConvertPlan,
    input: &Path,
    target: &AudioSpec,
    out: &Path,
) -> Result<()> {
    if let Some(parent) = out.parent() {
        fs::create_dir_all(parent).await.ok();
    }
    match plan {
        ConvertPlan::Copy => {
            fs::copy(input, out)
                .await
                .with_context(|| format!("Failed to copy {}", input.display()))?;
        }
        ConvertPlan::Transcode => {
            if !ffmpeg::normalize_audio(input, target.sample_rate, &target.codec, out).await? {
                anyhow::bail!("Transcode produced no output for {}", input.display());
            }
        }
    }
    Ok(())
}

/// Probes the clip and writes a compliant copy at `out`. The source is
/// never mutated. Returns the plan that was taken.
pub async fn ensure_compliant(input: &Path, target: &AudioSpec, out: &Path) -> Result<ConvertPlan> {
    let probed = ffmpeg::ffprobe_audio_spec(input).await?;
    let plan = ConvertPlan::for_specs(&probed, target);
    apply_plan(plan, input, target, out).await?;
    Ok(plan)
}

/// The fix-rates job: normalizes every media file under the input tree to
/// the configured sample rate and codec, mirroring the directory layout
/// into the output tree. Per-file failures are logged and skipped.
pub async fn run_fix_rates(cfg: &ConverterConfig) -> Result<usize> {
    let target = AudioSpec {
        sample_rate: cfg.sample_rate,
        codec: cfg.audio_codec.clone(),
    };

    let mut files = Vec::new();
    for entry in WalkDir::new(&cfg.input_dir).min_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.into_path();
        let matched = path
            .extension()
            .and_then(OsStr::to_str)
            .map(|e| MEDIA_EXTS.iter().any(|want| e.eq_ignore_ascii_case(want)))
            .unwrap_or(false);
        if matched {
            files.push(path);
        }
    }

    if files.is_empty() {
        logw(format!("No media files found in {}", cfg.input_dir.display()));
        return Ok(0);
    }

    let mut converted = 0usize;
    for input in &files {
        let rel = input
            .strip_prefix(&cfg.input_dir)
            .unwrap_or(input.as_path());
        let out = cfg.output_dir.join(rel);

        match ensure_compliant(input, &target, &out).await {
            Ok(ConvertPlan::Copy) => {
                logi(format!("Already compliant, copied: {}", input.display()));
            }
            Ok(ConvertPlan::Transcode) => {
                logok(format!(
                    "Normalized {} -> {} ({} Hz {})",
                    input.display(),
                    out.display(),
                    target.sample_rate,
                    target.codec
                ));
                converted += 1;
            }
            Err(err) => {
                logw(format!("Skipping {}: {}", input.display(), err));
            }
        }
    }

    logok(format!(
        "fix-rates done: {} transcoded, {} total",
        converted,
        files.len()
    ));
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(rate: u32, codec: &str) -> AudioSpec {
        AudioSpec {
            sample_rate: rate,
            codec: codec.to_string(),
        }
    }

    #[test]
    fn compliant_input_takes_copy_path() {
        let target = spec(44_100, "aac");
        assert_eq!(
            ConvertPlan::for_specs(&spec(44_100, "aac"), &target),
            ConvertPlan::Copy
        );
    }

    #[test]
    fn rate_or_codec_mismatch_takes_transcode_path() {
        let target = spec(44_100, "aac");
        assert_eq!(
            ConvertPlan::for_specs(&spec(48_000, "aac"), &target),
            ConvertPlan::Transcode
        );
        assert_eq!(
            ConvertPlan::for_specs(&spec(44_100, "mp3"), &target),
            ConvertPlan::Transcode
        );
    }

    #[tokio::test]
    async fn copy_plan_is_byte_identical() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("in.mp4");
        let out = tmp.path().join("sub").join("out.mp4");
        tokio::fs::write(&input, b"fake media bytes").await.unwrap();

        apply_plan(ConvertPlan::Copy, &input, &spec(44_100, "aac"), &out)
            .await
            .unwrap();

        let a = tokio::fs::read(&input).await.unwrap();
        let b = tokio::fs::read(&out).await.unwrap();
        assert_eq!(a, b);
    }
}
