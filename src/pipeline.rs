use crate::api::{elevenlabs, gemini};
use crate::compositor;
use crate::config::Config;
use crate::convert::{self, ConvertPlan};
use crate::ffmpeg::{self, AudioSpec, Encoder};
use crate::finalizer::{self, FinalizeJob};
use crate::selector::{AUDIO_EXTS, ClipPool, FfprobeDurations, Selector, Sequence, VIDEO_EXTS};
use crate::{logi, logok, logw};
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

async fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create {}", path.display()))?;
    Ok(())
}

async fn move_into(file: &Path, dir: &Path) -> Result<()> {
    ensure_dir(dir).await?;
    let dest = dir.join(file.file_name().unwrap_or_default());
    fs::rename(file, &dest)
        .await
        .with_context(|| format!("Failed to move {} to {}", file.display(), dest.display()))?;
    Ok(())
}

/// Writes a concat-demuxer list, with entries relative to the list file
/// where possible.
pub async fn write_concat_list(list_path: &Path, entries: &[PathBuf]) -> Result<()> {
    let base = list_path.parent().unwrap_or_else(|| Path::new("."));
    let mut file = fs::File::create(list_path)
        .await
        .with_context(|| format!("Failed to create {}", list_path.display()))?;
    for entry in entries {
        let rel = pathdiff::diff_paths(entry, base).unwrap_or_else(|| entry.clone());
        file.write_all(format!("file '{}'\n", rel.display()).as_bytes())
            .await?;
    }
    file.flush().await?;
    Ok(())
}

fn combiner_encoder(cfg: &Config) -> Encoder {
    if cfg.combiner.use_nvenc {
        Encoder::Nvenc {
            gpu: cfg.combiner.gpu,
        }
    } else {
        Encoder::X264
    }
}

/// Converter pass over a selected sequence: each clip is normalized into
/// the work dir. A clip whose conversion fails is dropped from the run;
/// the run itself continues.
async fn normalize_sequence(
    seq: &Sequence,
    target: &AudioSpec,
    work_dir: &Path,
    iteration: u32,
) -> Result<Vec<PathBuf>> {
    let mut normalized = Vec::new();
    for (idx, clip) in seq.clips.iter().enumerate() {
        let ext = clip
            .path
            .extension()
            .and_then(OsStr::to_str)
            .unwrap_or("mp4");
        let out = work_dir.join(format!("norm_{}_{}.{}", iteration, idx, ext));
        match convert::ensure_compliant(&clip.path, target, &out).await {
            Ok(ConvertPlan::Copy) => normalized.push(out),
            Ok(ConvertPlan::Transcode) => {
                logi(format!(
                    "Normalized {} -> {} Hz {}",
                    clip.path.display(),
                    target.sample_rate,
                    target.codec
                ));
                normalized.push(out);
            }
            Err(err) => {
                logw(format!(
                    "Clip unusable this run ({}): {}",
                    clip.path.display(),
                    err
                ));
            }
        }
    }
    Ok(normalized)
}

struct IterationFiles {
    bg_list: PathBuf,
    bg_concat: PathBuf,
    sequence: PathBuf,
    composited: PathBuf,
    narration: PathBuf,
    looped: PathBuf,
    mixed: PathBuf,
}

impl IterationFiles {
    fn new(work_dir: &Path, iteration: u32) -> Self {
        Self {
            bg_list: work_dir.join(format!("bg_list_{}.txt", iteration)),
            bg_concat: work_dir.join(format!("bg_{}.mp4", iteration)),
            sequence: work_dir.join(format!("seq_{}.mp4", iteration)),
            composited: work_dir.join(format!("composited_{}.mp4", iteration)),
            narration: work_dir.join(format!("narration_{}.m4a", iteration)),
            looped: work_dir.join(format!("looped_{}.wav", iteration)),
            mixed: work_dir.join(format!("mixed_{}.m4a", iteration)),
        }
    }

    async fn cleanup(&self) {
        for path in [
            &self.bg_list,
            &self.bg_concat,
            &self.sequence,
            &self.composited,
            &self.narration,
            &self.looped,
            &self.mixed,
        ] {
            let _ = fs::remove_file(path).await;
        }
    }
}

struct CombinerPools {
    foreground: ClipPool,
    background: ClipPool,
    title: Option<ClipPool>,
    music: ClipPool,
}

async fn run_combiner_iteration(
    cfg: &Config,
    pools: &CombinerPools,
    selector: &mut Selector,
    iteration: u32,
) -> Result<PathBuf> {
    let com = &cfg.combiner;
    let target = com.target_duration_s;
    let probe = FfprobeDurations;
    let files = IterationFiles::new(&com.work_dir, iteration);
    let encoder = combiner_encoder(cfg);
    let bitrate = compositor::quality_bitrate(&com.quality);

    // Selector stage: foreground sequence (optional title clip first),
    // then enough background to cover the target.
    let mut sequence = Sequence::default();
    if let Some(titles) = &pools.title {
        let title = selector.pick(titles)?;
        match ffmpeg::ffprobe_duration_seconds(&title).await {
            Ok(dur) => sequence.push(title, dur),
            Err(err) => logw(format!("Title clip unusable ({}): {}", title.display(), err)),
        }
    }
    let remaining = (target - sequence.total).max(0.0);
    let fill = selector.fill(&pools.foreground, remaining, &probe).await?;
    for clip in fill.clips {
        sequence.push(clip.path, clip.duration);
    }
    logi(format!(
        "Sequence: {} clips, {:.2}s (target {:.2}s, overshoot {:.2}s)",
        sequence.clips.len(),
        sequence.total,
        target,
        sequence.overshoot(target)
    ));

    let background = selector.fill(&pools.background, target, &probe).await?;
    logi(format!(
        "Background: {} clips, {:.2}s",
        background.clips.len(),
        background.total
    ));

    // Converter stage.
    let audio_target = AudioSpec {
        sample_rate: cfg.converter.sample_rate,
        codec: cfg.converter.audio_codec.clone(),
    };
    let normalized = normalize_sequence(&sequence, &audio_target, &com.work_dir, iteration).await?;
    if normalized.is_empty() {
        anyhow::bail!("No sequence clip survived normalization");
    }

    // Compositor stage: background concat (stream copy), scaled sequence
    // concat, color-key overlay, then the audio path.
    let bg_paths: Vec<PathBuf> = background.clips.iter().map(|c| c.path.clone()).collect();
    write_concat_list(&files.bg_list, &bg_paths).await?;
    let copy_args = vec!["-c".to_string(), "copy".to_string()];
    if !ffmpeg::concat_from_list(&files.bg_list, &copy_args, &[], &files.bg_concat).await? {
        anyhow::bail!("Background concat produced no output");
    }

    let (bg_w, bg_h) = ffmpeg::ffprobe_video_dimensions(&files.bg_concat).await?;
    if !compositor::concat_scaled(&normalized, bg_w, bg_h, encoder, bitrate, &files.sequence)
        .await?
    {
        anyhow::bail!("Sequence concat produced no output");
    }

    if !compositor::overlay_keyed(
        &files.bg_concat,
        &files.sequence,
        &com.overlay,
        encoder,
        bitrate,
        &files.composited,
    )
    .await?
    {
        anyhow::bail!("Overlay produced no output");
    }

    if !ffmpeg::extract_audio(&files.sequence, &files.narration).await? {
        anyhow::bail!("Audio extraction produced no output");
    }

    let music = selector.pick(&pools.music)?;
    let music_token = finalizer::first_words(&music, 2);
    if !ffmpeg::loop_audio(&music, target, &files.looped).await? {
        anyhow::bail!("Music loop produced no output");
    }
    if !compositor::mix_audio(
        &files.narration,
        &files.looped,
        com.gain_mode,
        com.music_gain,
        com.master_gain,
        &files.mixed,
    )
    .await?
    {
        anyhow::bail!("Audio mix produced no output");
    }

    // Finalizer stage.
    let final_path = finalizer::finalize(FinalizeJob {
        video: &files.composited,
        audio: &files.mixed,
        target_s: target,
        shortest: com.shortest,
        work_dir: &com.work_dir,
        output_dir: &com.output_dir,
        slug: &com.name_slug,
        tokens: vec![music_token],
        iteration,
        metadata: com.metadata.as_ref(),
    })
    .await?;

    files.cleanup().await;
    for path in &normalized {
        let _ = fs::remove_file(path).await;
    }
    Ok(final_path)
}

/// The combine job: runs the Selector/Converter/Compositor/Finalizer
/// pipeline for the configured number of iterations. A failed iteration is
/// logged and the next one starts; there is no retry of a failed stage.
pub async fn run_combiner(cfg: &Config) -> Result<u32> {
    let com = &cfg.combiner;
    ensure_dir(&com.work_dir).await?;
    ensure_dir(&com.output_dir).await?;

    let pools = CombinerPools {
        foreground: ClipPool::discover(&com.foreground_dir, VIDEO_EXTS)?,
        background: ClipPool::discover(&com.background_dir, VIDEO_EXTS)?,
        title: match &com.title_dir {
            Some(dir) => Some(ClipPool::discover(dir, VIDEO_EXTS)?),
            None => None,
        },
        music: ClipPool::discover(&com.music_dir, AUDIO_EXTS)?,
    };
    logi(format!(
        "Pools: {} foreground, {} background, {} music",
        pools.foreground.files.len(),
        pools.background.files.len(),
        pools.music.files.len()
    ));

    let mut selector = Selector::new(com.exhaust_policy, com.seed);
    let mut produced = 0u32;

    for iteration in 0..com.iterations {
        logi(format!(
            "\n=== Iteration {} of {} ===",
            iteration + 1,
            com.iterations
        ));
        match run_combiner_iteration(cfg, &pools, &mut selector, iteration).await {
            Ok(path) => {
                produced += 1;
                logok(format!("DONE: {}", path.display()));
            }
            Err(err) => {
                let files = IterationFiles::new(&com.work_dir, iteration);
                files.cleanup().await;
                logw(format!("FAILED iteration {}: {}", iteration + 1, err));
            }
        }
    }

    logi(format!("\nAll done. Produced: {}", produced));
    Ok(produced)
}

/// The tts job: synthesizes narration for every text file in the watched
/// folder using the per-filename voice mapping, retires the text, then
/// stitches the produced audio into one track.
pub async fn run_tts(cfg: &Config) -> Result<usize> {
    cfg.require_elevenlabs()?;
    let tts = &cfg.tts;
    ensure_dir(&tts.text_dir).await?;
    ensure_dir(&tts.audio_dir).await?;
    ensure_dir(&tts.processed_text_dir).await?;
    ensure_dir(&tts.processed_audio_dir).await?;
    ensure_dir(&tts.final_dir).await?;

    let client = reqwest::Client::new();
    let mut produced: Vec<PathBuf> = Vec::new();

    let mut entries = fs::read_dir(&tts.text_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(OsStr::to_str) != Some("txt") {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();

        let Some(voice_id) = cfg.voices.get(&file_name) else {
            logw(format!("No voice ID found for {}; skipping.", file_name));
            continue;
        };

        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.clone());
        let out_mp3 = tts.audio_dir.join(format!("{}.mp3", stem));

        logi(format!("TTS {} -> {}", file_name, out_mp3.display()));
        if !elevenlabs::tts_to_mp3(&client, cfg, voice_id, &text, &out_mp3).await? {
            logw(format!("TTS failed for {}", file_name));
            continue;
        }
        logok(format!("Audio saved: {}", out_mp3.display()));

        move_into(&path, &tts.processed_text_dir).await?;
        produced.push(out_mp3);

        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }

    if produced.is_empty() {
        logw("No audio produced; nothing to combine.".to_string());
        return Ok(0);
    }

    // Stitch in the configured order; anything unordered goes last, sorted.
    let mut ordered: Vec<PathBuf> = Vec::new();
    for stem in &tts.combine_order {
        let want = tts.audio_dir.join(format!("{}.mp3", stem));
        if let Some(pos) = produced.iter().position(|p| *p == want) {
            ordered.push(produced.remove(pos));
        }
    }
    produced.sort();
    ordered.extend(produced);

    let list = tts.audio_dir.join("combine_list.txt");
    write_concat_list(&list, &ordered).await?;
    let combined = tts.final_dir.join(combined_audio_name(Local::now()));
    let copy_args = vec!["-c".to_string(), "copy".to_string()];
    if !ffmpeg::concat_from_list(&list, &copy_args, &[], &combined).await? {
        logw("Audio combine failed; leaving per-voice files in place.".to_string());
        let _ = fs::remove_file(&list).await;
        return Ok(ordered.len());
    }
    let _ = fs::remove_file(&list).await;
    logok(format!("Combined audio: {}", combined.display()));

    for audio in &ordered {
        if let Err(err) = move_into(audio, &tts.processed_audio_dir).await {
            logw(format!("Failed to retire {}: {}", audio.display(), err));
        }
    }

    Ok(ordered.len())
}

/// Output name for one stitched batch. Stamped per run so successive
/// batches never overwrite each other.
fn combined_audio_name(stamp: DateTime<Local>) -> String {
    format!("combined_{}.mp3", stamp.format("%Y%m%d_%H%M%S"))
}

/// Splits generated commentary of the form `[Speaker] text ...` into
/// (speaker, text) pairs in document order.
pub fn split_sections(content: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for section in content.split('[').skip(1) {
        if let Some((name, body)) = section.split_once(']') {
            let name = name.trim();
            let body = body.trim();
            if !name.is_empty() && !body.is_empty() {
                out.push((name.to_string(), body.to_string()));
            }
        }
    }
    out
}

/// The mastermind job: generates commentary for each seed text through
/// Gemini, splits the speaker sections into per-voice text files, and runs
/// the tts flow over them.
pub async fn run_mastermind(cfg: &Config) -> Result<usize> {
    cfg.require_gemini()?;
    let mm = &cfg.mastermind;
    ensure_dir(&mm.inbox_dir).await?;
    ensure_dir(&mm.generated_dir).await?;
    ensure_dir(&mm.processed_dir).await?;
    ensure_dir(&cfg.tts.text_dir).await?;

    let custom_prompt = fs::read_to_string(&mm.prompt_file)
        .await
        .with_context(|| format!("Failed to read prompt file {}", mm.prompt_file.display()))?;

    let client = reqwest::Client::new();
    let mut generated = 0usize;

    let mut entries = fs::read_dir(&mm.inbox_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(OsStr::to_str) != Some("txt") {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();

        let seed_text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let prompt = format!("{}\n\n{}", seed_text, custom_prompt);

        logi(format!("Generating commentary for {}", file_name));
        let Some(text) = gemini::generate_text(&client, cfg, &prompt).await? else {
            logw(format!("Generation failed for {}; skipping.", file_name));
            continue;
        };

        let generated_path = mm.generated_dir.join(format!("[Original]-{}", file_name));
        fs::write(&generated_path, &text).await?;

        let sections = split_sections(&text);
        if sections.is_empty() {
            logw(format!("No speaker sections found in output for {}", file_name));
            continue;
        }
        for (speaker, body) in &sections {
            let section_path = cfg.tts.text_dir.join(format!("{}.txt", speaker));
            fs::write(&section_path, body).await?;
        }
        logok(format!(
            "Generated {} sections from {}",
            sections.len(),
            file_name
        ));

        move_into(&path, &mm.processed_dir).await?;
        generated += 1;
    }

    if generated == 0 {
        logw("Nothing generated; skipping TTS pass.".to_string());
        return Ok(0);
    }

    run_tts(cfg).await?;
    Ok(generated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stitched_batches_get_distinct_names() {
        let first = Local.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap();
        let second = Local.with_ymd_and_hms(2026, 3, 14, 15, 9, 27).unwrap();
        assert_eq!(combined_audio_name(first), "combined_20260314_150926.mp3");
        assert_ne!(combined_audio_name(first), combined_audio_name(second));
    }

    #[test]
    fn splits_speaker_sections_in_order() {
        let text = "[Zeno] Courage is knowing.\n[Zen Monk] Sit with it.\n[Zeno] Again.";
        let sections = split_sections(text);
        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].0, "Zeno");
        assert_eq!(sections[0].1, "Courage is knowing.");
        assert_eq!(sections[1].0, "Zen Monk");
    }

    #[test]
    fn malformed_sections_are_dropped() {
        assert!(split_sections("no sections here").is_empty());
        assert!(split_sections("[Empty]").is_empty());
        let sections = split_sections("leading [A] one [unclosed");
        assert_eq!(sections, vec![("A".to_string(), "one".to_string())]);
    }

    #[tokio::test]
    async fn concat_list_entries_are_relative_to_list_file() {
        let tmp = tempfile::tempdir().unwrap();
        let work = tmp.path().join("work");
        tokio::fs::create_dir_all(&work).await.unwrap();
        let list = work.join("list.txt");
        let entries = vec![work.join("a.mp4"), tmp.path().join("elsewhere/b.mp4")];

        write_concat_list(&list, &entries).await.unwrap();

        let content = tokio::fs::read_to_string(&list).await.unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], "file 'a.mp4'");
        assert!(lines[1].contains("elsewhere"));
    }
}
