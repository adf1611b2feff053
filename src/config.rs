use crate::compositor::GainMode;
use crate::selector::ExhaustPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;

/// One configuration object replacing the per-script hardcoded constants of
/// the old pipeline. Loaded from config.json in the working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub elevenlabs_api_key: String,
    #[serde(default = "default_eleven_model_id")]
    pub eleven_model_id: String,
    /// Maps a text file name (e.g. "Zeno.txt") to an ElevenLabs voice id.
    #[serde(default)]
    pub voices: HashMap<String, String>,

    #[serde(default)]
    pub gemini_api_key: String,
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,

    #[serde(default)]
    pub combiner: CombinerConfig,
    #[serde(default)]
    pub converter: ConverterConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub mastermind: MastermindConfig,
}

fn default_eleven_model_id() -> String {
    "eleven_multilingual_v2".to_string()
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CombinerConfig {
    pub background_dir: PathBuf,
    pub foreground_dir: PathBuf,
    /// Optional pool of intro clips; each sequence starts with one when set.
    pub title_dir: Option<PathBuf>,
    pub music_dir: PathBuf,
    pub output_dir: PathBuf,
    pub work_dir: PathBuf,
    pub target_duration_s: f64,
    pub iterations: u32,
    /// Quality preset name, resolved to a video bitrate by the compositor.
    pub quality: String,
    pub gain_mode: GainMode,
    /// Gain applied to the background music track before mixing.
    pub music_gain: f64,
    /// Gain applied to the mixed master track.
    pub master_gain: f64,
    pub overlay: OverlayConfig,
    pub exhaust_policy: ExhaustPolicy,
    /// Explicit RNG seed for reproducible selection; clock-seeded when unset.
    pub seed: Option<u64>,
    pub use_nvenc: bool,
    pub gpu: u32,
    /// Mux with -shortest so the longer of video/audio is truncated.
    pub shortest: bool,
    pub name_slug: String,
    pub metadata: Option<MetadataConfig>,
}

impl Default for CombinerConfig {
    fn default() -> Self {
        Self {
            background_dir: PathBuf::from("backgrounds"),
            foreground_dir: PathBuf::from("foregrounds"),
            title_dir: None,
            music_dir: PathBuf::from("music"),
            output_dir: PathBuf::from("output"),
            work_dir: PathBuf::from("work"),
            target_duration_s: 599.0,
            iterations: 1,
            quality: "Default".to_string(),
            gain_mode: GainMode::Decibels,
            music_gain: 0.0,
            master_gain: 0.0,
            overlay: OverlayConfig::default(),
            exhaust_policy: ExhaustPolicy::Reset,
            seed: None,
            use_nvenc: false,
            gpu: 0,
            shortest: true,
            name_slug: "Quotes_Video".to_string(),
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub zoom: f64,
    pub x_offset: i32,
    pub y_offset: i32,
    /// Color treated as transparent in the foreground, e.g. "0x000000".
    pub key_color: String,
    pub similarity: f64,
    pub blend: f64,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            x_offset: 0,
            y_offset: 0,
            key_color: "0x000000".to_string(),
            similarity: 0.1,
            blend: 0.1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub title: String,
    pub artist: String,
    pub genre: String,
    pub copyright: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub sample_rate: u32,
    pub audio_codec: String,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("convert_in"),
            output_dir: PathBuf::from("convert_out"),
            sample_rate: 44_100,
            audio_codec: "aac".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Target extension, e.g. "jpg" or "png".
    pub format: String,
    pub workers: usize,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("images_in"),
            output_dir: PathBuf::from("images_out"),
            format: "jpg".to_string(),
            workers: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub text_dir: PathBuf,
    pub audio_dir: PathBuf,
    pub processed_text_dir: PathBuf,
    pub processed_audio_dir: PathBuf,
    pub final_dir: PathBuf,
    /// File stems in the order their audio should be stitched together.
    pub combine_order: Vec<String>,
    pub stability: f64,
    pub similarity_boost: f64,
    pub style: f64,
    pub use_speaker_boost: bool,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            text_dir: PathBuf::from("tts/text"),
            audio_dir: PathBuf::from("tts/audio"),
            processed_text_dir: PathBuf::from("tts/processed_text"),
            processed_audio_dir: PathBuf::from("tts/processed_audio"),
            final_dir: PathBuf::from("tts/final"),
            combine_order: Vec::new(),
            stability: 0.5,
            similarity_boost: 0.8,
            style: 0.0,
            use_speaker_boost: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MastermindConfig {
    pub inbox_dir: PathBuf,
    pub generated_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub prompt_file: PathBuf,
}

impl Default for MastermindConfig {
    fn default() -> Self {
        Self {
            inbox_dir: PathBuf::from("mastermind/inbox"),
            generated_dir: PathBuf::from("mastermind/generated"),
            processed_dir: PathBuf::from("mastermind/processed"),
            prompt_file: PathBuf::from("prompt.txt"),
        }
    }
}

impl Config {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;
        Ok(config)
    }

    pub fn require_elevenlabs(&self) -> Result<()> {
        if self.elevenlabs_api_key.is_empty() {
            anyhow::bail!("config.json: elevenlabs_api_key missing");
        }
        if self.voices.is_empty() {
            anyhow::bail!("config.json: voices map is empty");
        }
        Ok(())
    }

    pub fn require_gemini(&self) -> Result<()> {
        if self.gemini_api_key.is_empty() {
            anyhow::bail!("config.json: gemini_api_key missing");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.eleven_model_id, "eleven_multilingual_v2");
        assert_eq!(cfg.combiner.quality, "Default");
        assert_eq!(cfg.combiner.overlay.zoom, 1.0);
        assert_eq!(cfg.converter.sample_rate, 44_100);
        assert_eq!(cfg.images.workers, 8);
        assert!(cfg.combiner.shortest);
    }

    #[test]
    fn policy_and_gain_mode_parse_from_strings() {
        let cfg: Config = serde_json::from_str(
            r#"{"combiner":{"exhaust_policy":"fail","gain_mode":"linear","seed":42}}"#,
        )
        .unwrap();
        assert_eq!(cfg.combiner.exhaust_policy, ExhaustPolicy::Fail);
        assert_eq!(cfg.combiner.gain_mode, GainMode::Linear);
        assert_eq!(cfg.combiner.seed, Some(42));
    }

    #[test]
    fn missing_keys_rejected_by_requires() {
        let cfg: Config = serde_json::from_str("{}").unwrap();
        assert!(cfg.require_elevenlabs().is_err());
        assert!(cfg.require_gemini().is_err());
    }
}
