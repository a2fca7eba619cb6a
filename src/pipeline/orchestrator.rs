//! Batch orchestrator
//!
//! Drives one run over an input directory: list images, find and read each
//! tag, plan a unique name per destination directory, write the ledger, then
//! commit every planned rename in two phases.

use anyhow::{bail, Context, Result};
use crossbeam_channel::Sender;
use image::DynamicImage;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use strsim::normalized_levenshtein;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::messages::{RunEvent, RunOutcome, RunState};
use crate::config::{AppConfig, TaskSettings};
use crate::naming::{plan_name, sanitize_and_upper, DuplicateIndex};
use crate::rename::{
    commit_plans, ensure_dir, iter_images, safe_clean_dir, write_mapping, LedgerRow, RenameOutcome,
    RenamePlan, Status,
};
use crate::vision::ocr::OCR_ERROR_MARKER;
use crate::vision::{
    crop_to_box, load_image, matches_target, merge_boxes, target_boxes, Detector, TextRecognizer,
};

/// One discovered image as it moves through the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub source_path: PathBuf,
    pub parent_directory: PathBuf,
    /// Raw OCR answer, including error-tagged text
    pub detected_text: Option<String>,
    pub base: String,
    pub final_name: String,
    pub status: Status,
}

impl ImageRecord {
    pub fn new(source_path: &Path, status: Status) -> Self {
        Self {
            source_path: source_path.to_path_buf(),
            parent_directory: source_path.parent().map(Path::to_path_buf).unwrap_or_default(),
            detected_text: None,
            base: String::new(),
            final_name: String::new(),
            status,
        }
    }

    pub fn to_row(&self) -> LedgerRow {
        LedgerRow {
            src_dir: self.parent_directory.display().to_string(),
            old_name: file_name_of(&self.source_path),
            ocr_text: self.detected_text.clone().unwrap_or_default(),
            base: self.base.clone(),
            final_name: self.final_name.clone(),
            status: self.status,
        }
    }
}

/// Output directory for `image_path`: `<output_root>/<first>_output`, where
/// `<first>` is the first directory below `input_root` on the image's path,
/// or the input root's own name for images directly inside it
pub fn destination_subdir(input_root: &Path, image_path: &Path, output_root: &Path) -> PathBuf {
    let parent = image_path.parent().unwrap_or(input_root);
    let first = match parent.strip_prefix(input_root) {
        Ok(rel) => rel
            .components()
            .next()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .unwrap_or_else(|| dir_name(input_root)),
        Err(_) => dir_name(parent),
    };
    output_root.join(format!("{}_output", first))
}

/// Ledger location for a run under the input root
pub fn ledger_path_for(task: &TaskSettings, run_id: Uuid) -> PathBuf {
    if !task.namespace_ledger {
        return task.input_dir.join(&task.ledger_name);
    }
    let name = Path::new(&task.ledger_name);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "rename_mapping".to_string());
    let ext = name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    task.input_dir.join(format!("{}-{}{}", stem, run_id.simple(), ext))
}

fn dir_name(path: &Path) -> String {
    // "." and ".." have no file name of their own
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .or_else(|| {
            path.canonicalize()
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        })
        .unwrap_or_else(|| "input".to_string())
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Runs the detect, read, plan and commit pipeline over one input directory
pub struct BatchOrchestrator {
    config: AppConfig,
    detector: Arc<dyn Detector>,
    recognizer: Arc<dyn TextRecognizer>,
    events: Option<Sender<RunEvent>>,
}

impl BatchOrchestrator {
    pub fn new(config: AppConfig, detector: Arc<dyn Detector>, recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self {
            config,
            detector,
            recognizer,
            events: None,
        }
    }

    /// Send run events to `events`
    pub fn with_events(mut self, events: Sender<RunEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Execute one run to completion.
    ///
    /// `cancel` is checked before each image. Plans made before cancellation
    /// are still written to the ledger and committed.
    pub fn run(&self, cancel: &CancellationToken) -> RunOutcome {
        let start = Instant::now();
        let run_id = Uuid::new_v4();
        info!("Run {} starting on {:?}", run_id, self.config.task.input_dir);

        let mut outcome = RunOutcome::default();
        let result = self.execute(cancel, run_id, &mut outcome);
        outcome.stats.elapsed = start.elapsed();

        match result {
            Ok(()) => {
                let stats = &outcome.stats;
                self.log(format!(
                    "[OK] Run complete; planned {}, succeeded {}, failed {}; took {:.1}s",
                    stats.planned,
                    stats.renamed_ok,
                    stats.renamed_fail,
                    stats.elapsed.as_secs_f64()
                ));
            }
            Err(e) => {
                error!("Run {} failed: {:#}", run_id, e);
                self.emit(RunEvent::Log(format!("[FATAL] {:#}", e)));
                outcome.code = 1;
                outcome.error = Some(format!("{:#}", e));
            }
        }

        self.set_state(if outcome.cancelled {
            RunState::Cancelled
        } else {
            RunState::Done
        });
        self.emit(RunEvent::Finished(outcome.clone()));
        outcome
    }

    fn execute(&self, cancel: &CancellationToken, run_id: Uuid, outcome: &mut RunOutcome) -> Result<()> {
        let task = &self.config.task;
        let input_root = task.input_dir.as_path();

        if !input_root.is_dir() {
            bail!("Input directory {:?} does not exist", input_root);
        }
        ensure_dir(&task.output_root)
            .with_context(|| format!("Failed to create output root {:?}", task.output_root))?;

        let crops_dir = task.effective_crops_dir();
        if let Some(dir) = &crops_dir {
            ensure_dir(dir).with_context(|| format!("Failed to create crops directory {:?}", dir))?;
        }
        self.check_target_class();

        self.set_state(RunState::Listing);
        let images = iter_images(input_root, task.recursive)
            .with_context(|| format!("Failed to list images in {:?}", input_root))?;
        let total = images.len();
        outcome.stats.total = total;
        if images.is_empty() {
            self.log("[WARN] No images found");
        } else {
            self.log(format!("[INFO] Found {} images", total));
        }

        self.set_state(RunState::Processing);
        let mut cleaned: HashSet<PathBuf> = HashSet::new();
        let mut indexes: HashMap<PathBuf, DuplicateIndex> = HashMap::new();
        let mut records: Vec<ImageRecord> = Vec::with_capacity(total);
        let mut plans: Vec<RenamePlan> = Vec::new();
        // records[planned[i]] belongs to plans[i]
        let mut planned: Vec<usize> = Vec::new();

        for (i, image_path) in images.iter().enumerate() {
            if cancel.is_cancelled() {
                self.log("[CANCEL] Stop requested; planned renames will still run");
                outcome.cancelled = true;
                break;
            }

            let sub_out = destination_subdir(input_root, image_path, &task.output_root);
            if cleaned.insert(sub_out.clone()) {
                ensure_dir(&sub_out)
                    .with_context(|| format!("Failed to create output directory {:?}", sub_out))?;
                if task.clean_output {
                    let removed = safe_clean_dir(&sub_out);
                    self.log(format!("[INFO] Cleaned {:?} ({} entries)", sub_out, removed));
                }
            }

            let index = match indexes.entry(sub_out.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => entry.insert(
                    DuplicateIndex::collect_existing(&sub_out)
                        .with_context(|| format!("Failed to scan {:?}", sub_out))?,
                ),
            };

            let record = self.process_image(image_path, index, crops_dir.as_deref());
            if record.status == Status::Planned {
                plans.push(RenamePlan::new(image_path.clone(), sub_out.join(&record.final_name)));
                planned.push(records.len());
            }

            self.emit(RunEvent::Progress {
                fraction: (i + 1) as f32 / total as f32,
                message: format!(
                    "{} ({}/{}): {}",
                    file_name_of(image_path),
                    i + 1,
                    total,
                    record.status
                ),
            });
            records.push(record);
        }
        outcome.stats.planned = plans.len();

        self.set_state(RunState::Finalizing);
        let ledger_path = ledger_path_for(task, run_id);
        let rows: Vec<LedgerRow> = records.iter().map(ImageRecord::to_row).collect();
        write_mapping(&ledger_path, &rows)
            .context("Failed to write rename ledger; no files were renamed")?;
        outcome.ledger_path = Some(ledger_path.clone());
        self.log(format!("[INFO] Ledger written to {:?} ({} rows)", ledger_path, rows.len()));

        if task.dry_run {
            self.log(format!("[DRY-RUN] {} renames planned, none performed", plans.len()));
            return Ok(());
        }

        let report = commit_plans(&plans);
        let (ok, fail) = report.counts();
        outcome.stats.renamed_ok = ok;
        outcome.stats.renamed_fail = fail;

        for (result, &record_idx) in report.outcomes.iter().zip(&planned) {
            let record = &mut records[record_idx];
            record.status = if result.is_success() {
                Status::RenamedOk
            } else {
                Status::RenamedFail
            };
            match result {
                RenameOutcome::Failed { error, left_at } => {
                    self.log(format!("[FAIL] {}; file is at {:?}", error, left_at));
                }
                RenameOutcome::Vanished => {
                    self.log(format!("[FAIL] {:?} disappeared before commit", record.source_path));
                }
                RenameOutcome::Renamed => {}
            }
        }

        let rows: Vec<LedgerRow> = records.iter().map(ImageRecord::to_row).collect();
        write_mapping(&ledger_path, &rows).context("Failed to record rename results in ledger")?;

        Ok(())
    }

    /// Carry one image from decode to a planned name or a failure status
    fn process_image(&self, path: &Path, index: &mut DuplicateIndex, crops_dir: Option<&Path>) -> ImageRecord {
        let detector_settings = &self.config.detector;

        let image = match load_image(path) {
            Ok(image) => image,
            Err(e) => {
                warn!("{}", e);
                return ImageRecord::new(path, Status::ReadFail);
            }
        };

        let detections = match self.detector.detect(&image) {
            Ok(detections) => detections,
            Err(e) => {
                warn!("Detection failed for {:?}: {:#}", path, e);
                self.emit(RunEvent::Log(format!("[WARN] Detection failed for {:?}: {:#}", path, e)));
                Vec::new()
            }
        };

        let boxes = target_boxes(
            &detections,
            &detector_settings.target_class,
            detector_settings.use_mask_tight_bbox,
        );
        let Some(bbox) = merge_boxes(&boxes) else {
            debug!("No {} in {:?}", detector_settings.target_class, path);
            return ImageRecord::new(path, Status::NoDet);
        };

        let crop = crop_to_box(&image, &bbox);
        if let Some(dir) = crops_dir {
            save_crop(&crop, path, dir);
        }

        let text = match self.recognizer.recognize(&crop, &self.config.ocr.prompt) {
            Ok(text) => text,
            Err(e) => {
                warn!("OCR failed for {:?}: {}", path, e);
                format!("{} {}", OCR_ERROR_MARKER, e)
            }
        };

        let no_text = ImageRecord {
            detected_text: Some(text.clone()),
            ..ImageRecord::new(path, Status::NoText)
        };
        if text.trim().is_empty() || text.starts_with(OCR_ERROR_MARKER) {
            return no_text;
        }

        let base = sanitize_and_upper(&text);
        if base.is_empty() {
            return no_text;
        }

        let extension = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let final_name = plan_name(&base, &extension, index, self.config.task.duplicates);
        debug!("Planned {:?} -> {}", path, final_name);

        ImageRecord {
            detected_text: Some(text),
            base,
            final_name,
            ..ImageRecord::new(path, Status::Planned)
        }
    }

    /// Warn when the target class is not among the configured class names
    fn check_target_class(&self) {
        let settings = &self.config.detector;
        if settings.class_names.is_empty()
            || settings
                .class_names
                .iter()
                .any(|name| matches_target(name, &settings.target_class))
        {
            return;
        }

        let target = settings.target_class.trim().to_lowercase();
        let closest = settings
            .class_names
            .iter()
            .map(|name| (name, normalized_levenshtein(&name.to_lowercase(), &target)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(name, _)| name.as_str())
            .unwrap_or_default();

        self.log(format!(
            "[WARN] Target class '{}' is not a known class; closest is '{}'",
            settings.target_class, closest
        ));
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn log(&self, line: impl Into<String>) {
        let line = line.into();
        info!("{}", line);
        self.emit(RunEvent::Log(line));
    }

    fn set_state(&self, state: RunState) {
        debug!("Run state: {}", state);
        self.emit(RunEvent::State(state));
    }
}

/// Save a crop as `<parent>_<stem>_cropped<ext>`; failures are only logged
fn save_crop(crop: &DynamicImage, source: &Path, dir: &Path) {
    let parent = source
        .parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = source
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
        .unwrap_or_default();

    let target = dir.join(format!("{}_{}_cropped{}", parent, stem, ext));
    if let Err(e) = crop.save(&target) {
        debug!("Could not save crop {:?}: {}", target, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OcrError;
    use crate::rename::read_mapping;
    use crate::vision::{BoundingBox, Detection};
    use image::RgbImage;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    /// Tag on 8px-wide images, another class on 9px, an error on anything else
    struct FakeDetector;

    impl Detector for FakeDetector {
        fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
            let detection = |class_name: &str| Detection {
                class_id: 0,
                class_name: class_name.to_string(),
                confidence: Some(0.9),
                bbox: BoundingBox::new(1.0, 1.0, 5.0, 5.0),
                mask: None,
            };
            match image.width() {
                8 => Ok(vec![detection("WhiteTag")]),
                9 => Ok(vec![detection("person")]),
                _ => bail!("inference exploded"),
            }
        }
    }

    /// Answers from a script, in call order; optionally cancels on the first call
    struct ScriptedOcr {
        replies: Mutex<VecDeque<Result<String, OcrError>>>,
        cancel_on_call: Option<CancellationToken>,
    }

    impl ScriptedOcr {
        fn new(replies: Vec<Result<String, OcrError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                cancel_on_call: None,
            }
        }

        fn texts(texts: &[&str]) -> Self {
            Self::new(texts.iter().map(|t| Ok(t.to_string())).collect())
        }
    }

    impl TextRecognizer for ScriptedOcr {
        fn name(&self) -> &str {
            "scripted"
        }

        fn recognize(&self, _image: &DynamicImage, _prompt: &str) -> Result<String, OcrError> {
            if let Some(token) = &self.cancel_on_call {
                token.cancel();
            }
            self.replies.lock().pop_front().unwrap_or_else(|| Ok(String::new()))
        }
    }

    struct Fixture {
        _dir: TempDir,
        input: PathBuf,
        output: PathBuf,
        config: AppConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let input = dir.path().join("in");
            let output = dir.path().join("out");
            std::fs::create_dir_all(&input).unwrap();

            let mut config = AppConfig::default();
            config.task.input_dir = input.clone();
            config.task.output_root = output.clone();
            config.task.save_crops = false;

            Self {
                _dir: dir,
                input,
                output,
                config,
            }
        }

        fn image(&self, rel: &str, width: u32) -> PathBuf {
            let path = self.input.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            RgbImage::new(width, 6).save(&path).unwrap();
            path
        }

        fn run(&self, ocr: ScriptedOcr) -> (RunOutcome, Vec<RunEvent>) {
            self.run_with(ocr, CancellationToken::new())
        }

        fn run_with(&self, ocr: ScriptedOcr, cancel: CancellationToken) -> (RunOutcome, Vec<RunEvent>) {
            let (tx, rx) = crossbeam_channel::unbounded();
            let orchestrator =
                BatchOrchestrator::new(self.config.clone(), Arc::new(FakeDetector), Arc::new(ocr)).with_events(tx);
            let outcome = orchestrator.run(&cancel);
            drop(orchestrator);
            (outcome, rx.iter().collect())
        }

        fn ledger(&self) -> Vec<LedgerRow> {
            read_mapping(&self.input.join("rename_mapping.csv")).unwrap()
        }
    }

    #[test]
    fn test_end_to_end_run() {
        let fx = Fixture::new();
        let a = fx.image("a.png", 8);
        fx.image("b.png", 9);
        std::fs::write(fx.input.join("c.png"), b"not an image").unwrap();
        let d = fx.image("d.PNG", 8);
        fx.image("e.png", 10);
        let a_bytes = std::fs::read(&a).unwrap();

        let (outcome, events) = fx.run(ScriptedOcr::texts(&["tag 1", "TAG 1"]));

        assert!(outcome.is_success());
        assert!(!outcome.cancelled);
        assert_eq!(outcome.stats.total, 5);
        assert_eq!(outcome.stats.planned, 2);
        assert_eq!((outcome.stats.renamed_ok, outcome.stats.renamed_fail), (2, 0));

        let out_dir = fx.output.join("in_output");
        assert_eq!(std::fs::read(out_dir.join("TAG-1-1.png")).unwrap(), a_bytes);
        assert!(out_dir.join("TAG-1-2.png").exists());
        assert!(!a.exists());
        assert!(!d.exists());
        assert!(fx.input.join("b.png").exists());
        assert!(fx.input.join("e.png").exists());

        let rows = fx.ledger();
        let statuses: Vec<Status> = rows.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![Status::RenamedOk, Status::NoDet, Status::ReadFail, Status::RenamedOk, Status::NoDet]
        );
        assert_eq!(rows[0].src_dir, fx.input.display().to_string());
        assert_eq!(rows[0].old_name, "a.png");
        assert_eq!(rows[0].ocr_text, "tag 1");
        assert_eq!(rows[0].base, "TAG-1");
        assert_eq!(rows[0].final_name, "TAG-1-1.png");
        assert_eq!(rows[3].final_name, "TAG-1-2.png");

        let fractions: Vec<f32> = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Progress { fraction, .. } => Some(*fraction),
                _ => None,
            })
            .collect();
        assert_eq!(fractions.len(), 5);
        assert!(fractions.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(fractions.last(), Some(&1.0));

        let states: Vec<RunState> = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::State(s) => Some(*s),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![RunState::Listing, RunState::Processing, RunState::Finalizing, RunState::Done]
        );
        assert!(matches!(events.last(), Some(RunEvent::Finished(_))));
    }

    #[test]
    fn test_zero_images_writes_header_only_ledger() {
        let fx = Fixture::new();

        let (outcome, _) = fx.run(ScriptedOcr::texts(&[]));

        assert!(outcome.is_success());
        assert_eq!(outcome.stats.total, 0);
        assert_eq!(outcome.stats.planned, 0);
        assert_eq!(outcome.ledger_path, Some(fx.input.join("rename_mapping.csv")));
        assert!(fx.ledger().is_empty());
    }

    #[test]
    fn test_dry_run_moves_nothing() {
        let mut fx = Fixture::new();
        fx.config.task.dry_run = true;
        let a = fx.image("a.png", 8);
        let b = fx.image("b.png", 8);

        let (outcome, _) = fx.run(ScriptedOcr::texts(&["x", "y"]));

        assert_eq!(outcome.stats.planned, 2);
        assert_eq!((outcome.stats.renamed_ok, outcome.stats.renamed_fail), (0, 0));
        assert!(a.exists());
        assert!(b.exists());
        assert_eq!(std::fs::read_dir(fx.output.join("in_output")).unwrap().count(), 0);

        let rows = fx.ledger();
        assert!(rows.iter().all(|r| r.status == Status::Planned));
        assert_eq!(rows[0].final_name, "X-1.png");
    }

    #[test]
    fn test_ocr_failures_are_no_text() {
        let fx = Fixture::new();
        for name in ["a.png", "b.png", "c.png", "d.png"] {
            fx.image(name, 8);
        }

        let (outcome, _) = fx.run(ScriptedOcr::new(vec![
            Err(OcrError::Response("boom".to_string())),
            Ok("  ".to_string()),
            Ok("UNKNOWN".to_string()),
            Ok("!!!".to_string()),
        ]));

        assert_eq!(outcome.stats.planned, 1);
        let rows = fx.ledger();
        let statuses: Vec<Status> = rows.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![Status::NoText, Status::NoText, Status::RenamedOk, Status::NoText]
        );
        assert!(rows[0].ocr_text.starts_with(OCR_ERROR_MARKER));
        assert!(rows[0].ocr_text.contains("boom"));
        assert_eq!(rows[2].final_name, "UNKNOWN-1.png");
        assert!(fx.output.join("in_output/UNKNOWN-1.png").exists());
    }

    #[test]
    fn test_subdirectories_get_own_outputs_and_indexes() {
        let mut fx = Fixture::new();
        fx.config.task.recursive = true;
        fx.config.task.clean_output = false;
        fx.image("c.png", 8);
        fx.image("x/a.png", 8);
        fx.image("y/deep/b.png", 8);
        let existing = fx.output.join("x_output/TAG-1.jpg");
        std::fs::create_dir_all(existing.parent().unwrap()).unwrap();
        std::fs::write(&existing, b"old").unwrap();

        let (outcome, _) = fx.run(ScriptedOcr::texts(&["tag", "tag", "tag"]));

        assert_eq!(outcome.stats.renamed_ok, 3);
        assert!(fx.output.join("in_output/TAG-1.png").exists());
        assert!(fx.output.join("x_output/TAG-2.png").exists());
        assert!(fx.output.join("y_output/TAG-1.png").exists());
        assert_eq!(std::fs::read(&existing).unwrap(), b"old");
    }

    #[test]
    fn test_clean_output_runs_before_first_use() {
        let fx = Fixture::new();
        let stale = fx.output.join("in_output/stale.txt");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, b"stale").unwrap();
        fx.image("a.png", 8);
        fx.image("b.png", 8);

        let (outcome, _) = fx.run(ScriptedOcr::texts(&["a", "b"]));

        assert_eq!(outcome.stats.renamed_ok, 2);
        assert!(!stale.exists());
        assert!(fx.output.join("in_output/A-1.png").exists());
        assert!(fx.output.join("in_output/B-1.png").exists());
    }

    #[test]
    fn test_cancel_still_commits_planned() {
        let fx = Fixture::new();
        fx.image("a.png", 8);
        let b = fx.image("b.png", 8);
        let cancel = CancellationToken::new();
        let ocr = ScriptedOcr {
            cancel_on_call: Some(cancel.clone()),
            ..ScriptedOcr::texts(&["first", "second"])
        };

        let (outcome, events) = fx.run_with(ocr, cancel);

        assert!(outcome.is_success());
        assert!(outcome.cancelled);
        assert_eq!(outcome.stats.total, 2);
        assert_eq!(outcome.stats.planned, 1);
        assert_eq!(outcome.stats.renamed_ok, 1);
        assert!(fx.output.join("in_output/FIRST-1.png").exists());
        assert!(b.exists());
        assert_eq!(fx.ledger().len(), 1);
        assert!(events.iter().any(|e| matches!(e, RunEvent::State(RunState::Cancelled))));
    }

    #[test]
    fn test_ledger_failure_blocks_commit() {
        let fx = Fixture::new();
        std::fs::create_dir_all(fx.input.join("rename_mapping.csv")).unwrap();
        let a = fx.image("a.png", 8);

        let (outcome, _) = fx.run(ScriptedOcr::texts(&["a"]));

        assert_eq!(outcome.code, 1);
        assert!(outcome.error.is_some());
        assert!(outcome.ledger_path.is_none());
        assert_eq!(outcome.stats.planned, 1);
        assert_eq!(outcome.stats.renamed_ok, 0);
        assert!(a.exists());
    }

    #[test]
    fn test_missing_input_is_fatal() {
        let mut fx = Fixture::new();
        fx.config.task.input_dir = fx.input.join("nope");

        let (outcome, events) = fx.run(ScriptedOcr::texts(&[]));

        assert_eq!(outcome.code, 1);
        assert_eq!(outcome.stats.total, 0);
        assert!(matches!(events.last(), Some(RunEvent::Finished(o)) if o.code == 1));
    }

    #[test]
    fn test_crops_are_saved() {
        let mut fx = Fixture::new();
        fx.config.task.save_crops = true;
        fx.image("a.PNG", 8);

        fx.run(ScriptedOcr::texts(&["a"]));

        let crop = fx.output.join("cropped/in_a_cropped.png");
        let image = image::open(&crop).unwrap();
        assert_eq!((image.width(), image.height()), (4, 4));
    }

    #[test]
    fn test_namespaced_ledger() {
        let mut fx = Fixture::new();
        fx.config.task.namespace_ledger = true;

        let (outcome, _) = fx.run(ScriptedOcr::texts(&[]));

        let path = outcome.ledger_path.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("rename_mapping-"));
        assert!(name.ends_with(".csv"));
        assert_eq!(name.len(), "rename_mapping-".len() + 32 + ".csv".len());
        assert!(path.exists());
    }

    fn log_lines(events: &[RunEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                RunEvent::Log(line) => Some(line.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_unknown_target_class_suggests_closest() {
        let mut fx = Fixture::new();
        fx.config.detector.class_names = vec!["person".to_string(), "WhiteTag".to_string()];
        fx.config.detector.target_class = "WhiteTg".to_string();

        let (outcome, events) = fx.run(ScriptedOcr::texts(&[]));

        assert!(outcome.is_success());
        let warning = log_lines(&events)
            .into_iter()
            .find(|line| line.contains("WhiteTg"))
            .map(str::to_string)
            .unwrap();
        assert!(warning.starts_with("[WARN]"));
        assert!(warning.contains("closest is 'WhiteTag'"));
    }

    #[test]
    fn test_known_target_class_is_quiet() {
        let mut fx = Fixture::new();
        fx.config.detector.target_class = " whitetag ".to_string();

        let (_, events) = fx.run(ScriptedOcr::texts(&[]));

        assert!(!log_lines(&events).iter().any(|line| line.contains("Target class")));
    }

    #[test]
    fn test_destination_subdir() {
        let root = Path::new("/data/in");
        let out = Path::new("/out");
        assert_eq!(
            destination_subdir(root, Path::new("/data/in/a.png"), out),
            PathBuf::from("/out/in_output")
        );
        assert_eq!(
            destination_subdir(root, Path::new("/data/in/x/y/a.png"), out),
            PathBuf::from("/out/x_output")
        );
        assert_eq!(
            destination_subdir(root, Path::new("/elsewhere/z/a.png"), out),
            PathBuf::from("/out/z_output")
        );
    }
}
