use crate::config::MetadataConfig;
use crate::error::PipelineError;
use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use tokio::process::Command;

/// Video encoder selection. Nvenc pins the child process to one GPU via
/// CUDA_VISIBLE_DEVICES; one device at a time, never parallel dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoder {
    X264,
    Nvenc { gpu: u32 },
}

impl Encoder {
    pub fn codec_args(&self, bitrate: &str) -> Vec<String> {
        match self {
            Encoder::X264 => vec![
                "-c:v".to_string(),
                "libx264".to_string(),
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
                "-preset".to_string(),
                "veryfast".to_string(),
                "-b:v".to_string(),
                bitrate.to_string(),
            ],
            Encoder::Nvenc { .. } => vec![
                "-c:v".to_string(),
                "h264_nvenc".to_string(),
                "-preset".to_string(),
                "slow".to_string(),
                "-b:v".to_string(),
                bitrate.to_string(),
            ],
        }
    }

    pub fn env(&self) -> Vec<(String, String)> {
        match self {
            Encoder::X264 => Vec::new(),
            Encoder::Nvenc { gpu } => {
                vec![("CUDA_VISIBLE_DEVICES".to_string(), gpu.to_string())]
            }
        }
    }
}

async fn run_cmd(args: &[String], envs: &[(String, String)]) -> Result<()> {
    if args.is_empty() {
        return Ok(());
    }

    let mut cmd = Command::new(&args[0]);
    if args.len() > 1 {
        cmd.args(&args[1..]);
    }
    for (key, value) in envs {
        cmd.env(key, value);
    }

    let status = cmd.status().await.context("Command execution failed")?;
    if !status.success() {
        return Err(PipelineError::ToolFailed(format!("{:?}", args)).into());
    }

    Ok(())
}

fn base_args() -> Vec<String> {
    vec![
        "ffmpeg".to_string(),
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
    ]
}

pub async fn ffprobe_duration_seconds(path: &Path) -> Result<f64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe duration failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed for {}", path.display()));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let duration = text.parse::<f64>().unwrap_or(-1.0);
    if duration <= 0.0 {
        return Err(anyhow::anyhow!("Invalid duration for {}", path.display()));
    }
    Ok(duration)
}

pub async fn ffprobe_video_dimensions(path: &Path) -> Result<(i32, i32)> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "v:0",
            "-show_entries",
            "stream=width,height",
            "-of",
            "csv=s=x:p=0",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe execution failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed for {}", path.display()));
    }

    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let mut parts = text.split('x');
    let w = parts
        .next()
        .and_then(|v| v.parse::<i32>().ok())
        .unwrap_or(0);
    let h = parts
        .next()
        .and_then(|v| v.parse::<i32>().ok())
        .unwrap_or(0);

    if w <= 0 || h <= 0 {
        return Err(anyhow::anyhow!("Invalid dimensions for {}", path.display()));
    }

    Ok((w, h))
}

/// Probed properties of the first audio stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSpec {
    pub sample_rate: u32,
    pub codec: String,
}

static PROBE_KV_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(\w+)=(\S+)$").unwrap());

pub fn parse_audio_spec(probe_output: &str) -> Option<AudioSpec> {
    let mut sample_rate = None;
    let mut codec = None;
    for cap in PROBE_KV_RE.captures_iter(probe_output) {
        match &cap[1] {
            "sample_rate" => sample_rate = cap[2].parse::<u32>().ok(),
            "codec_name" => codec = Some(cap[2].to_string()),
            _ => {}
        }
    }
    Some(AudioSpec {
        sample_rate: sample_rate?,
        codec: codec?,
    })
}

pub async fn ffprobe_audio_spec(path: &Path) -> Result<AudioSpec> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-select_streams",
            "a:0",
            "-show_entries",
            "stream=codec_name,sample_rate",
            "-of",
            "default=noprint_wrappers=1",
        ])
        .arg(path)
        .output()
        .await
        .context("ffprobe audio spec failed")?;

    if !output.status.success() {
        return Err(anyhow::anyhow!("ffprobe failed for {}", path.display()));
    }

    let text = String::from_utf8_lossy(&output.stdout).to_string();
    parse_audio_spec(&text)
        .ok_or_else(|| anyhow::anyhow!("No audio stream info for {}", path.display()))
}

/// Concat-demuxer join of the files listed in `list_txt`, with the caller
/// choosing the codec arguments (re-encode or stream copy).
pub async fn concat_from_list(
    list_txt: &Path,
    codec_args: &[String],
    envs: &[(String, String)],
    out: &Path,
) -> Result<bool> {
    let mut args = base_args();
    args.extend([
        "-f".to_string(),
        "concat".to_string(),
        "-safe".to_string(),
        "0".to_string(),
        "-i".to_string(),
        list_txt.display().to_string(),
    ]);
    args.extend(codec_args.iter().cloned());
    args.push(out.display().to_string());
    run_cmd(&args, envs).await?;
    Ok(out.exists())
}

pub async fn extract_audio(input: &Path, out_m4a: &Path) -> Result<bool> {
    let mut args = base_args();
    args.extend([
        "-i".to_string(),
        input.display().to_string(),
        "-vn".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
        out_m4a.display().to_string(),
    ]);
    run_cmd(&args, &[]).await?;
    Ok(out_m4a.exists())
}

/// Loops an audio file end-to-end until `dur_s` is covered.
pub async fn loop_audio(input: &Path, dur_s: f64, out: &Path) -> Result<bool> {
    let mut args = base_args();
    args.extend([
        "-stream_loop".to_string(),
        "-1".to_string(),
        "-i".to_string(),
        input.display().to_string(),
        "-t".to_string(),
        format!("{:.3}", dur_s),
        out.display().to_string(),
    ]);
    run_cmd(&args, &[]).await?;
    Ok(out.exists())
}

/// Stream-copy trim to an exact duration (no re-encode).
pub async fn trim_copy(input: &Path, dur_s: f64, out: &Path) -> Result<bool> {
    let mut args = base_args();
    args.extend([
        "-i".to_string(),
        input.display().to_string(),
        "-t".to_string(),
        format!("{:.3}", dur_s),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
        out.display().to_string(),
    ]);
    run_cmd(&args, &[]).await?;
    Ok(out.exists())
}

/// One filter_complex stage over the given inputs, mapping the named output
/// pads (or plain stream specifiers).
pub async fn run_filter(
    inputs: &[&Path],
    filter: &str,
    maps: &[&str],
    codec_args: &[String],
    envs: &[(String, String)],
    out: &Path,
) -> Result<bool> {
    let mut args = base_args();
    for input in inputs {
        args.push("-i".to_string());
        args.push(input.display().to_string());
    }
    args.push("-filter_complex".to_string());
    args.push(filter.to_string());
    for map in maps {
        args.push("-map".to_string());
        args.push((*map).to_string());
    }
    args.extend(codec_args.iter().cloned());
    args.push(out.display().to_string());
    run_cmd(&args, envs).await?;
    Ok(out.exists())
}

/// Argument vector for the final mux, ending in the output path.
pub fn mux_args(video: &Path, audio: &Path, shortest: bool, out: &Path) -> Vec<String> {
    let mut args = base_args();
    args.extend([
        "-i".to_string(),
        video.display().to_string(),
        "-i".to_string(),
        audio.display().to_string(),
        "-map".to_string(),
        "0:v".to_string(),
        "-map".to_string(),
        "1:a".to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        "192k".to_string(),
    ]);
    if shortest {
        args.push("-shortest".to_string());
    }
    args.push("-movflags".to_string());
    args.push("+faststart".to_string());
    args.push(out.display().to_string());
    args
}

/// Muxes a video stream and an audio stream into one container, stream
/// copying the video. With `shortest` the longer stream is truncated.
pub async fn mux_streams(video: &Path, audio: &Path, shortest: bool, out: &Path) -> Result<bool> {
    run_cmd(&mux_args(video, audio, shortest, out), &[]).await?;
    Ok(out.exists())
}

/// Stamps container metadata by writing a stream-copied sibling and renaming
/// it over the original. A failed tool run removes the sibling and errors.
pub async fn tag_metadata(path: &Path, meta: &MetadataConfig) -> Result<()> {
    let tagged = path.with_extension("metadata.mp4");
    let mut args = base_args();
    args.extend([
        "-i".to_string(),
        path.display().to_string(),
        "-metadata".to_string(),
        format!("title={}", meta.title),
        "-metadata".to_string(),
        format!("artist={}", meta.artist),
        "-metadata".to_string(),
        format!("genre={}", meta.genre),
        "-metadata".to_string(),
        format!("copyright={}", meta.copyright),
        "-metadata".to_string(),
        format!("description={}", meta.description),
        "-codec:v".to_string(),
        "copy".to_string(),
        "-codec:a".to_string(),
        "copy".to_string(),
        tagged.display().to_string(),
    ]);

    if let Err(err) = run_cmd(&args, &[]).await {
        let _ = tokio::fs::remove_file(&tagged).await;
        return Err(err);
    }

    tokio::fs::rename(&tagged, path)
        .await
        .with_context(|| format!("Failed to replace {} with tagged copy", path.display()))?;
    Ok(())
}

/// Re-encodes only the audio track to the target sample rate and codec,
/// copying the video stream untouched.
pub async fn normalize_audio(
    input: &Path,
    sample_rate: u32,
    codec: &str,
    out: &Path,
) -> Result<bool> {
    let mut args = base_args();
    args.extend([
        "-i".to_string(),
        input.display().to_string(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-ar".to_string(),
        sample_rate.to_string(),
        "-c:a".to_string(),
        codec.to_string(),
        out.display().to_string(),
    ]);
    run_cmd(&args, &[]).await?;
    Ok(out.exists())
}

pub async fn convert_image(input: &Path, out: &Path) -> Result<bool> {
    let mut args = base_args();
    args.extend([
        "-i".to_string(),
        input.display().to_string(),
        out.display().to_string(),
    ]);
    run_cmd(&args, &[]).await?;
    Ok(out.exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_audio_spec_from_probe_output() {
        let out = "codec_name=aac\nsample_rate=44100\n";
        let spec = parse_audio_spec(out).unwrap();
        assert_eq!(spec.sample_rate, 44_100);
        assert_eq!(spec.codec, "aac");
    }

    #[test]
    fn rejects_probe_output_missing_stream_info() {
        assert!(parse_audio_spec("").is_none());
        assert!(parse_audio_spec("codec_name=aac\n").is_none());
        assert!(parse_audio_spec("sample_rate=garbage\ncodec_name=aac\n").is_none());
    }

    #[test]
    fn mux_carries_shortest_only_when_configured() {
        let video = Path::new("video.mp4");
        let audio = Path::new("audio.m4a");
        let out = Path::new("out.mp4");

        let with = mux_args(video, audio, true, out);
        assert!(with.contains(&"-shortest".to_string()));

        let without = mux_args(video, audio, false, out);
        assert!(!without.contains(&"-shortest".to_string()));
        assert_eq!(without.last(), Some(&"out.mp4".to_string()));
    }

    #[tokio::test]
    async fn failed_metadata_pass_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("missing.mp4");
        let meta = MetadataConfig::default();

        assert!(tag_metadata(&missing, &meta).await.is_err());
        assert!(!missing.with_extension("metadata.mp4").exists());
    }

    #[test]
    fn nvenc_pins_one_device() {
        let enc = Encoder::Nvenc { gpu: 1 };
        assert_eq!(
            enc.env(),
            vec![("CUDA_VISIBLE_DEVICES".to_string(), "1".to_string())]
        );
        assert!(enc.codec_args("4000k").contains(&"h264_nvenc".to_string()));
        assert!(Encoder::X264.env().is_empty());
    }
}
