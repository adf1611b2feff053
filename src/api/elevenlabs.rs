use crate::config::Config;
use crate::logw;
use anyhow::{Context, Result};
use reqwest::Client;
use std::path::Path;
use tokio::fs;
use tracing::warn;

/// Synthesizes `text` with the given voice and writes the mp3 response.
/// HTTP failure is logged and reported as `false`; never retried.
pub async fn tts_to_mp3(
    client: &Client,
    cfg: &Config,
    voice_id: &str,
    text: &str,
    out_mp3_path: &Path,
) -> Result<bool> {
    let url = format!(
        "https://api.elevenlabs.io/v1/text-to-speech/{}?output_format=mp3_44100_128",
        voice_id
    );

    let body = serde_json::json!({
        "text": text,
        "model_id": cfg.eleven_model_id,
        "voice_settings": {
            "stability": cfg.tts.stability,
            "similarity_boost": cfg.tts.similarity_boost,
            "style": cfg.tts.style,
            "use_speaker_boost": cfg.tts.use_speaker_boost,
        },
    });

    let resp = client
        .post(url)
        .header("Content-Type", "application/json")
        .header("xi-api-key", &cfg.elevenlabs_api_key)
        .json(&body)
        .timeout(std::time::Duration::from_secs(300))
        .send()
        .await
        .context("ElevenLabs request failed")?;

    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let raw = resp.text().await.unwrap_or_default();
        logw(format!("ElevenLabs TTS failed HTTP {}", status));
        if !raw.is_empty() {
            let snippet = raw.chars().take(400).collect::<String>();
            warn!("ElevenLabs error body: {}", snippet);
        }
        return Ok(false);
    }

    let bytes = resp.bytes().await.context("ElevenLabs response read failed")?;
    if let Some(parent) = out_mp3_path.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create dir {}", parent.display()))?;
    }
    fs::write(out_mp3_path, &bytes).await?;

    Ok(fs::metadata(out_mp3_path).await.is_ok())
}
