use crate::config::OverlayConfig;
use crate::ffmpeg::{self, Encoder};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Volume-adjustment convention. Linear multiplies amplitude (0.5 = half);
/// decibels offsets it logarithmically. The two are not equivalent and the
/// choice is configured per pipeline, never unified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GainMode {
    Linear,
    #[serde(rename = "db")]
    Decibels,
}

impl GainMode {
    pub fn volume_filter(&self, gain: f64) -> String {
        match self {
            GainMode::Linear => format!("volume={}", gain),
            GainMode::Decibels => format!("volume={}dB", gain),
        }
    }
}

/// Resolves a quality preset name to a video bitrate.
pub fn quality_bitrate(quality: &str) -> &'static str {
    match quality {
        "High" => "4000k",
        "Higher" => "6000k",
        "Intense" => "8000k",
        "Extreme" => "10000k",
        _ => "2000k",
    }
}

/// Filter graph scaling `n` inputs to a common resolution (aspect preserved,
/// padded) and concatenating video+audio in input order.
pub fn scale_concat_filter(n: usize, width: i32, height: i32) -> String {
    let mut filter = String::new();
    for i in 0..n {
        filter.push_str(&format!(
            "[{i}:v]scale={width}:{height}:force_original_aspect_ratio=decrease,\
pad={width}:{height}:(ow-iw)/2:(oh-ih)/2[v{i}];"
        ));
    }
    for i in 0..n {
        filter.push_str(&format!("[v{i}][{i}:a]"));
    }
    filter.push_str(&format!("concat=n={n}:v=1:a=1[v][a]"));
    filter
}

/// Filter graph keying out a color from the foreground, scaling it by
/// `zoom`, and overlaying it centered (plus offsets) on the background.
pub fn overlay_filter(
    fg_dims: (i32, i32),
    bg_dims: (i32, i32),
    cfg: &OverlayConfig,
) -> String {
    let scaled_w = (fg_dims.0 as f64 * cfg.zoom) as i32;
    let scaled_h = (fg_dims.1 as f64 * cfg.zoom) as i32;
    let x = (bg_dims.0 - scaled_w) / 2 + cfg.x_offset;
    let y = (bg_dims.1 - scaled_h) / 2 + cfg.y_offset;
    format!(
        "[1:v]colorkey={key}:{sim}:{blend},scale={scaled_w}:{scaled_h}[fg];\
[0:v][fg]overlay=x={x}:y={y}[video]",
        key = cfg.key_color,
        sim = cfg.similarity,
        blend = cfg.blend,
    )
}

/// Filter graph mixing narration with background music: music gain first,
/// two-input amix trimmed to the narration, then a master gain.
pub fn mix_filter(mode: GainMode, music_gain: f64, master_gain: f64) -> String {
    format!(
        "[1:a]{music}[aud];[0:a][aud]amix=inputs=2:duration=first:dropout_transition=2[mix];\
[mix]{master}[out]",
        music = mode.volume_filter(music_gain),
        master = mode.volume_filter(master_gain),
    )
}

const AUDIO_CODEC_ARGS: &[&str] = &["-c:a", "aac", "-b:a", "192k"];

fn audio_codec_args() -> Vec<String> {
    AUDIO_CODEC_ARGS.iter().map(|s| s.to_string()).collect()
}

/// Scales every sequence clip to the target resolution and concatenates
/// them in order. One tool invocation for the whole stage.
pub async fn concat_scaled(
    clips: &[PathBuf],
    width: i32,
    height: i32,
    encoder: Encoder,
    bitrate: &str,
    out: &Path,
) -> Result<bool> {
    let filter = scale_concat_filter(clips.len(), width, height);
    let inputs: Vec<&Path> = clips.iter().map(PathBuf::as_path).collect();
    let mut codec_args = encoder.codec_args(bitrate);
    codec_args.extend(audio_codec_args());
    ffmpeg::run_filter(
        &inputs,
        &filter,
        &["[v]", "[a]"],
        &codec_args,
        &encoder.env(),
        out,
    )
    .await
}

/// Overlays the keyed foreground onto the background. The output carries
/// video only; audio travels separately until the final mux.
pub async fn overlay_keyed(
    background: &Path,
    foreground: &Path,
    cfg: &OverlayConfig,
    encoder: Encoder,
    bitrate: &str,
    out: &Path,
) -> Result<bool> {
    let fg_dims = ffmpeg::ffprobe_video_dimensions(foreground).await?;
    let bg_dims = ffmpeg::ffprobe_video_dimensions(background).await?;
    let filter = overlay_filter(fg_dims, bg_dims, cfg);
    ffmpeg::run_filter(
        &[background, foreground],
        &filter,
        &["[video]"],
        &encoder.codec_args(bitrate),
        &encoder.env(),
        out,
    )
    .await
}

/// Mixes the narration track with looped background music.
pub async fn mix_audio(
    narration: &Path,
    music: &Path,
    mode: GainMode,
    music_gain: f64,
    master_gain: f64,
    out: &Path,
) -> Result<bool> {
    let filter = mix_filter(mode, music_gain, master_gain);
    ffmpeg::run_filter(
        &[narration, music],
        &filter,
        &["[out]"],
        &audio_codec_args(),
        &[],
        out,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_and_db_gains_are_distinct_conventions() {
        assert_eq!(GainMode::Linear.volume_filter(0.5), "volume=0.5");
        assert_eq!(GainMode::Decibels.volume_filter(0.5), "volume=0.5dB");
        assert_eq!(GainMode::Decibels.volume_filter(-6.0), "volume=-6dB");
        assert_eq!(GainMode::Linear.volume_filter(2.5), "volume=2.5");
    }

    #[test]
    fn scale_concat_preserves_input_order() {
        let filter = scale_concat_filter(3, 1080, 1920);
        assert!(filter.contains("[0:v]scale=1080:1920"));
        assert!(filter.contains("[2:v]scale=1080:1920"));
        assert!(filter.ends_with("concat=n=3:v=1:a=1[v][a]"));
        // Pads feed concat in index order.
        let chain_pos = filter.find("[v0][0:a][v1][1:a][v2][2:a]").unwrap();
        assert!(chain_pos < filter.len());
    }

    #[test]
    fn overlay_centers_scaled_foreground() {
        let cfg = OverlayConfig {
            zoom: 0.5,
            x_offset: 10,
            y_offset: -20,
            ..OverlayConfig::default()
        };
        let filter = overlay_filter((1920, 1080), (1920, 1080), &cfg);
        // 1920*0.5 = 960 wide, centered at (1920-960)/2 = 480, plus offset.
        assert!(filter.contains("scale=960:540"));
        assert!(filter.contains("overlay=x=490:y=250"));
        assert!(filter.contains("colorkey=0x000000:0.1:0.1"));
    }

    #[test]
    fn mix_trims_to_narration_length() {
        let filter = mix_filter(GainMode::Decibels, -3.0, 9.0);
        assert!(filter.contains("[1:a]volume=-3dB[aud]"));
        assert!(filter.contains("amix=inputs=2:duration=first"));
        assert!(filter.contains("[mix]volume=9dB[out]"));
    }

    #[test]
    fn quality_presets_map_to_bitrates() {
        assert_eq!(quality_bitrate("Default"), "2000k");
        assert_eq!(quality_bitrate("Extreme"), "10000k");
        assert_eq!(quality_bitrate("unknown"), "2000k");
    }
}
