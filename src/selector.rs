use crate::error::PipelineError;
use crate::logw;
use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use walkdir::WalkDir;

pub const VIDEO_EXTS: &[&str] = &["mp4"];
pub const AUDIO_EXTS: &[&str] = &["mp3", "wav", "m4a"];

/// What to do when every clip in a pool has been used once before the
/// target duration is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustPolicy {
    /// Clear the used set and keep drawing; repeats become possible.
    Reset,
    /// Abort the run with an exhaustion error.
    Fail,
}

pub fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A candidate pool discovered by recursive traversal of one directory.
#[derive(Debug, Clone)]
pub struct ClipPool {
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
}

impl ClipPool {
    /// Walks `dir` collecting files with one of the given extensions.
    /// Results are sorted so seeded runs are reproducible.
    pub fn discover(dir: &Path, exts: &[&str]) -> Result<Self> {
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).min_depth(1) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            let matched = path
                .extension()
                .and_then(OsStr::to_str)
                .map(|e| exts.iter().any(|want| e.eq_ignore_ascii_case(want)))
                .unwrap_or(false);
            if matched {
                files.push(path);
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(PipelineError::EmptyPool(dir.to_path_buf()).into());
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceClip {
    pub path: PathBuf,
    pub duration: f64,
}

/// Ordered clip selection with its accumulated duration. Grows until the
/// total meets the target; clips appear in output in exactly this order.
#[derive(Debug, Clone, Default)]
pub struct Sequence {
    pub clips: Vec<SequenceClip>,
    pub total: f64,
}

impl Sequence {
    pub fn push(&mut self, path: PathBuf, duration: f64) {
        self.total += duration;
        self.clips.push(SequenceClip { path, duration });
    }

    pub fn overshoot(&self, target: f64) -> f64 {
        (self.total - target).max(0.0)
    }
}

/// Duration lookup for a candidate clip. Production probes through ffprobe;
/// tests substitute a fixed table.
#[async_trait]
pub trait DurationProbe: Send + Sync {
    async fn duration_seconds(&self, path: &Path) -> Result<f64>;
}

pub struct FfprobeDurations;

#[async_trait]
impl DurationProbe for FfprobeDurations {
    async fn duration_seconds(&self, path: &Path) -> Result<f64> {
        crate::ffmpeg::ffprobe_duration_seconds(path).await
    }
}

/// Random clip selection without immediate repetition. Usage history is
/// kept per pool, so exhausting one pool never resets another's.
pub struct Selector {
    rng: StdRng,
    used: HashMap<PathBuf, HashSet<PathBuf>>,
    policy: ExhaustPolicy,
}

impl Selector {
    pub fn new(policy: ExhaustPolicy, seed: Option<u64>) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed.unwrap_or_else(clock_seed)),
            used: HashMap::new(),
            policy,
        }
    }

    /// Draws one unused clip from the pool.
    pub fn pick(&mut self, pool: &ClipPool) -> Result<PathBuf> {
        loop {
            let used = self.used.entry(pool.dir.clone()).or_default();
            let candidates: Vec<&PathBuf> =
                pool.files.iter().filter(|p| !used.contains(*p)).collect();

            if candidates.is_empty() {
                match self.policy {
                    ExhaustPolicy::Reset => {
                        logw(format!(
                            "All clips in {} used once; resetting and continuing.",
                            pool.dir.display()
                        ));
                        used.clear();
                        continue;
                    }
                    ExhaustPolicy::Fail => {
                        return Err(PipelineError::PoolUsedUp(pool.dir.clone()).into());
                    }
                }
            }

            let idx = self.rng.gen_range(0..candidates.len());
            let chosen = candidates[idx].clone();
            used.insert(chosen.clone());
            return Ok(chosen);
        }
    }

    /// Accumulates randomly drawn clips until the sequence duration meets
    /// `target`. Candidates whose probe fails or reports a non-positive
    /// duration are skipped for the rest of the run.
    pub async fn fill(
        &mut self,
        pool: &ClipPool,
        target: f64,
        probe: &dyn DurationProbe,
    ) -> Result<Sequence> {
        let mut seq = Sequence::default();
        let mut unusable: HashSet<PathBuf> = HashSet::new();

        while seq.total < target {
            let used = self.used.entry(pool.dir.clone()).or_default();
            let candidates: Vec<&PathBuf> = pool
                .files
                .iter()
                .filter(|p| !used.contains(*p) && !unusable.contains(*p))
                .collect();

            if candidates.is_empty() {
                if unusable.len() == pool.files.len() {
                    return Err(PipelineError::NoUsableDurations(pool.dir.clone()).into());
                }
                match self.policy {
                    ExhaustPolicy::Reset => {
                        logw(format!(
                            "Pool {} exhausted at {:.2}s / {:.2}s; resetting used set.",
                            pool.dir.display(),
                            seq.total,
                            target
                        ));
                        used.clear();
                        continue;
                    }
                    ExhaustPolicy::Fail => {
                        return Err(PipelineError::PoolExhausted {
                            target,
                            accumulated: seq.total,
                        }
                        .into());
                    }
                }
            }

            let idx = self.rng.gen_range(0..candidates.len());
            let chosen = candidates[idx].clone();
            used.insert(chosen.clone());

            match probe.duration_seconds(&chosen).await {
                Ok(dur) if dur > 0.0 => seq.push(chosen, dur),
                Ok(_) => {
                    logw(format!("Zero duration for {}; skipping.", chosen.display()));
                    unusable.insert(chosen);
                }
                Err(err) => {
                    logw(format!(
                        "Duration probe failed for {}: {}",
                        chosen.display(),
                        err
                    ));
                    unusable.insert(chosen);
                }
            }
        }

        Ok(seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeProbe {
        durations: HashMap<PathBuf, f64>,
    }

    impl FakeProbe {
        fn new(pairs: &[(&str, f64)]) -> Self {
            Self {
                durations: pairs
                    .iter()
                    .map(|(name, d)| (PathBuf::from(name), *d))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl DurationProbe for FakeProbe {
        async fn duration_seconds(&self, path: &Path) -> Result<f64> {
            self.durations
                .get(path)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("probe failed"))
        }
    }

    fn pool_in(dir: &str, names: &[&str]) -> ClipPool {
        ClipPool {
            dir: PathBuf::from(dir),
            files: names.iter().map(PathBuf::from).collect(),
        }
    }

    fn pool_of(names: &[&str]) -> ClipPool {
        pool_in("pool", names)
    }

    #[tokio::test]
    async fn stops_as_soon_as_target_is_met() {
        let pool = pool_of(&["a.mp4", "b.mp4", "c.mp4"]);
        let probe = FakeProbe::new(&[("a.mp4", 30.0), ("b.mp4", 45.0), ("c.mp4", 20.0)]);
        let mut sel = Selector::new(ExhaustPolicy::Fail, Some(7));

        let seq = sel.fill(&pool, 60.0, &probe).await.unwrap();
        assert!(seq.total >= 60.0);
        // Termination must be immediate: without the last clip the total
        // was still below the target.
        let last = seq.clips.last().unwrap();
        assert!(seq.total - last.duration < 60.0);
    }

    #[tokio::test]
    async fn never_repeats_within_one_cycle() {
        let names = ["a.mp4", "b.mp4", "c.mp4", "d.mp4", "e.mp4"];
        let pool = pool_of(&names);
        let probe = FakeProbe::new(&names.map(|n| (n, 10.0)));
        let mut sel = Selector::new(ExhaustPolicy::Fail, Some(3));

        let seq = sel.fill(&pool, 50.0, &probe).await.unwrap();
        assert_eq!(seq.clips.len(), 5);
        let distinct: HashSet<_> = seq.clips.iter().map(|c| &c.path).collect();
        assert_eq!(distinct.len(), 5);
    }

    #[tokio::test]
    async fn reset_policy_reuses_after_exhaustion() {
        let pool = pool_of(&["a.mp4", "b.mp4"]);
        let probe = FakeProbe::new(&[("a.mp4", 10.0), ("b.mp4", 10.0)]);
        let mut sel = Selector::new(ExhaustPolicy::Reset, Some(1));

        let seq = sel.fill(&pool, 50.0, &probe).await.unwrap();
        assert!(seq.total >= 50.0);
        assert_eq!(seq.clips.len(), 5);
        let distinct: HashSet<_> = seq.clips.iter().map(|c| &c.path).collect();
        assert_eq!(distinct.len(), 2);
    }

    #[tokio::test]
    async fn fail_policy_errors_on_exhaustion() {
        let pool = pool_of(&["a.mp4", "b.mp4"]);
        let probe = FakeProbe::new(&[("a.mp4", 10.0), ("b.mp4", 10.0)]);
        let mut sel = Selector::new(ExhaustPolicy::Fail, Some(1));

        let err = sel.fill(&pool, 50.0, &probe).await.unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::PoolExhausted { accumulated, .. }) => {
                assert!((accumulated - 20.0).abs() < f64::EPSILON);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn all_unusable_durations_is_an_error() {
        let pool = pool_of(&["a.mp4", "b.mp4"]);
        let probe = FakeProbe::new(&[("a.mp4", 0.0)]);
        let mut sel = Selector::new(ExhaustPolicy::Reset, Some(1));

        let err = sel.fill(&pool, 30.0, &probe).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::NoUsableDurations(_))
        ));
    }

    #[tokio::test]
    async fn seeded_selection_is_reproducible() {
        let names = ["a.mp4", "b.mp4", "c.mp4", "d.mp4"];
        let pool = pool_of(&names);
        let probe = FakeProbe::new(&names.map(|n| (n, 15.0)));

        let first = Selector::new(ExhaustPolicy::Fail, Some(99))
            .fill(&pool, 45.0, &probe)
            .await
            .unwrap();
        let second = Selector::new(ExhaustPolicy::Fail, Some(99))
            .fill(&pool, 45.0, &probe)
            .await
            .unwrap();

        let a: Vec<_> = first.clips.iter().map(|c| c.path.clone()).collect();
        let b: Vec<_> = second.clips.iter().map(|c| c.path.clone()).collect();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn resetting_one_pool_keeps_other_pools_history() {
        let videos = pool_in("videos", &["a.mp4", "b.mp4", "c.mp4"]);
        let music = pool_in("music", &["track.mp3"]);
        let probe = FakeProbe::new(&[("a.mp4", 10.0), ("b.mp4", 10.0), ("c.mp4", 10.0)]);
        let mut sel = Selector::new(ExhaustPolicy::Reset, Some(11));

        let seq = sel.fill(&videos, 20.0, &probe).await.unwrap();
        assert_eq!(seq.clips.len(), 2);

        // Second music pick exhausts and resets that pool alone.
        sel.pick(&music).unwrap();
        sel.pick(&music).unwrap();

        let drawn: HashSet<_> = seq.clips.iter().map(|c| c.path.clone()).collect();
        let leftover = sel.pick(&videos).unwrap();
        assert!(!drawn.contains(&leftover));
    }

    #[tokio::test]
    async fn pick_fail_policy_reports_used_up_pool() {
        let pool = pool_of(&["a.mp4"]);
        let mut sel = Selector::new(ExhaustPolicy::Fail, Some(5));
        sel.pick(&pool).unwrap();
        let err = sel.pick(&pool).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::PoolUsedUp(_))
        ));
    }

    #[test]
    fn discover_filters_by_extension_and_rejects_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        std::fs::write(tmp.path().join("one.mp4"), b"x").unwrap();
        std::fs::write(nested.join("two.MP4"), b"x").unwrap();
        std::fs::write(nested.join("notes.txt"), b"x").unwrap();

        let pool = ClipPool::discover(tmp.path(), VIDEO_EXTS).unwrap();
        assert_eq!(pool.files.len(), 2);

        let err = ClipPool::discover(tmp.path(), &["flac"]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::EmptyPool(_))
        ));
    }

    #[test]
    fn overshoot_is_clamped_at_zero() {
        let mut seq = Sequence::default();
        seq.push(PathBuf::from("a.mp4"), 30.0);
        assert_eq!(seq.overshoot(60.0), 0.0);
        seq.push(PathBuf::from("b.mp4"), 45.0);
        assert!((seq.overshoot(60.0) - 15.0).abs() < f64::EPSILON);
    }
}
