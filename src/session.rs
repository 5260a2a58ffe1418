//! Frame ingestion. A background worker pulls frames from a
//! [`FrameSource`], normalizes each one, smooths pupils and landmarks
//! across a sliding window, and appends snapshots to a shared,
//! mutex-protected sequence that readers can consume while loading is
//! still in progress.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use image::imageops;
use image::RgbImage;
use tracing::{debug, info, warn};

use crate::clip::{ClipEditor, ClipRange};
use crate::config::EngineConfig;
use crate::detector::{BackgroundRemover, FaceDetector};
use crate::error::{FaceError, Result};
use crate::geometry;
use crate::normalize::{calc_pd, FaceFrame, NormalizationEngine};
use crate::smoothing::PointWindow;
use crate::types::{FrameSnapshot, Point};

/// Tilt magnitude, degrees, beyond which a frame is assumed to come
/// from a sideways-recorded video and the whole stream gets rotated.
const ROTATE_TILT_THRESHOLD: f64 = 70.0;

/// Supplies raw frames to the ingestion worker.
pub trait FrameSource {
    /// Total frames, when known up front.
    fn frame_count(&self) -> usize;

    fn frame_rate(&self) -> f64;

    /// The next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;
}

/// Reads still images from a directory in filename order.
pub struct ImageDirSource {
    paths: Vec<PathBuf>,
    next: usize,
    frame_rate: f64,
}

impl ImageDirSource {
    pub fn open(dir: &Path, frame_rate: f64) -> Result<Self> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("png") | Some("jpg") | Some("jpeg") | Some("bmp")
                )
            })
            .collect();
        paths.sort();
        if paths.is_empty() {
            return Err(FaceError::Source(format!(
                "no images under '{}'",
                dir.display()
            )));
        }
        Ok(Self {
            paths,
            next: 0,
            frame_rate,
        })
    }
}

impl FrameSource for ImageDirSource {
    fn frame_count(&self) -> usize {
        self.paths.len()
    }

    fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let Some(path) = self.paths.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        let img = image::open(path)?.to_rgb8();
        Ok(Some(img))
    }
}

/// Whole-stream rotation pinned once a hypothesis succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseRotation {
    Clockwise90,
    CounterClockwise90,
}

impl BaseRotation {
    fn apply(self, image: &RgbImage) -> RgbImage {
        match self {
            BaseRotation::Clockwise90 => imageops::rotate90(image),
            BaseRotation::CounterClockwise90 => imageops::rotate270(image),
        }
    }
}

fn rotated(image: &RgbImage, rotation: Option<BaseRotation>) -> RgbImage {
    match rotation {
        Some(r) => r.apply(image),
        None => image.clone(),
    }
}

/// Remaining-time estimate from frames completed so far.
#[derive(Debug)]
pub struct EtaTracker {
    total: usize,
    done: usize,
    started: Instant,
}

impl EtaTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            done: 0,
            started: Instant::now(),
        }
    }

    pub fn cycle(&mut self) -> Duration {
        self.done += 1;
        let remaining = self.total.saturating_sub(self.done);
        if remaining == 0 {
            return Duration::ZERO;
        }
        let per_frame = self.started.elapsed().div_f64(self.done as f64);
        per_frame.mul_f64(remaining as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub frame: usize,
    pub total: usize,
    pub eta: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
    Completed,
    Cancelled,
}

/// The captured snapshots, shared between the worker and readers.
#[derive(Debug, Clone, Default)]
pub struct FrameSequence {
    inner: Arc<Mutex<Vec<FrameSnapshot>>>,
}

impl FrameSequence {
    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<FrameSnapshot>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, snapshot: FrameSnapshot) {
        self.lock().push(snapshot);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, index: usize) -> Option<FrameSnapshot> {
        self.lock().get(index).cloned()
    }

    pub fn to_vec(&self) -> Vec<FrameSnapshot> {
        self.lock().clone()
    }

    pub fn replace(&self, frames: Vec<FrameSnapshot>) {
        *self.lock() = frames;
    }
}

/// Normalizes one frame. A degenerate pupil pair aborts only this
/// frame; detector and source errors stay fatal.
fn normalize_frame<D, B>(
    engine: &mut NormalizationEngine<D, B>,
    image: &RgbImage,
    pupils: Option<(Point, Point)>,
) -> Result<Option<FaceFrame>>
where
    D: FaceDetector,
    B: BackgroundRemover,
{
    match engine.load_image(image, true, pupils) {
        Ok(face) => Ok(Some(face)),
        Err(FaceError::PupilsCoincide) => Ok(None),
        Err(e) => Err(e),
    }
}

fn report_progress(
    progress: Option<&Sender<Progress>>,
    frame: usize,
    total: usize,
    eta: &mut EtaTracker,
) {
    let eta = eta.cycle();
    if let Some(tx) = progress {
        let _ = tx.send(Progress { frame, total, eta });
    }
}

/// Runs the ingestion loop to completion or cancellation. Frames where
/// no rotation hypothesis finds a face, and frames whose pupil geometry
/// is degenerate, are skipped; every consumed frame reports progress.
pub fn ingest<S, D, B>(
    mut source: S,
    mut engine: NormalizationEngine<D, B>,
    config: &EngineConfig,
    sequence: &FrameSequence,
    cancel: &AtomicBool,
    progress: Option<&Sender<Progress>>,
) -> Result<()>
where
    S: FrameSource,
    D: FaceDetector,
    B: BackgroundRemover,
{
    let total = source.frame_count();
    let mut eta = EtaTracker::new(total);
    let mut base_rotation: Option<BaseRotation> = None;
    let mut pupil_window = PointWindow::new(config.pupil_window);
    let mut landmark_window = PointWindow::new(config.landmark_window);
    let mut smoothed_pupils: Option<(Point, Point)> = None;

    let mut index = 0usize;
    while !cancel.load(Ordering::Relaxed) {
        let Some(raw) = source.next_frame()? else {
            break;
        };
        index += 1;
        debug!(frame = index, "begin frame");

        let mut face = match normalize_frame(&mut engine, &rotated(&raw, base_rotation), smoothed_pupils)? {
            Some(face) => face,
            None => {
                warn!(frame = index, "degenerate pupil geometry, skipping frame");
                report_progress(progress, index, total, &mut eta);
                continue;
            }
        };

        if !face.has_face() {
            // Try each stream rotation before giving up on the frame.
            let mut found = false;
            for hypothesis in [BaseRotation::Clockwise90, BaseRotation::CounterClockwise90] {
                base_rotation = Some(hypothesis);
                if let Some(candidate) =
                    normalize_frame(&mut engine, &rotated(&raw, base_rotation), smoothed_pupils)?
                {
                    face = candidate;
                }
                if face.has_face() {
                    info!(frame = index, ?hypothesis, "pinned stream rotation");
                    found = true;
                    break;
                }
            }
            if !found {
                base_rotation = None;
                warn!(frame = index, "no face found, skipping frame");
                report_progress(progress, index, total, &mut eta);
                continue;
            }
        }

        // A near-90-degree tilt on an unrotated stream usually means a
        // sideways recording; pin a rotation by tilt sign and redo.
        if base_rotation.is_none() {
            if let Some(pupils) = face.pupils() {
                let tilt = geometry::to_degrees(geometry::face_rotation(pupils));
                if tilt.abs() > ROTATE_TILT_THRESHOLD {
                    base_rotation = Some(if tilt < 0.0 {
                        BaseRotation::Clockwise90
                    } else {
                        BaseRotation::CounterClockwise90
                    });
                    info!(frame = index, tilt, "tilt pinned stream rotation");
                    match normalize_frame(&mut engine, &rotated(&raw, base_rotation), smoothed_pupils)? {
                        Some(retried) if retried.has_face() => face = retried,
                        _ => {
                            warn!(frame = index, "face lost after tilt rotation, skipping");
                            report_progress(progress, index, total, &mut eta);
                            continue;
                        }
                    }
                }
            }
        }

        if let Some((left, right)) = face.orig_pupils {
            pupil_window.push(vec![left, right]);
            smoothed_pupils = pupil_window
                .mean()
                .map(|mean| (mean[0], mean[1]));
        }

        landmark_window.push(face.landmarks.points().to_vec());
        if let Some(smoothed) = landmark_window.smoothed() {
            face.landmarks.set_points(smoothed);
            if !face.lateral {
                if let Some(pupils) = face.landmarks.pupils() {
                    match calc_pd(pupils) {
                        Ok((pd, pix2mm)) => {
                            face.pupillary_distance = pd;
                            face.pix2mm = pix2mm;
                        }
                        Err(_) => {
                            warn!(frame = index, "smoothed pupils coincide, keeping detected scale");
                        }
                    }
                }
            }
        }

        sequence.push(face.snapshot());
        report_progress(progress, index, total, &mut eta);
    }
    Ok(())
}

/// Owns a capture session: the shared sequence, the clip editor over
/// it, and the background worker while one is running.
pub struct SessionController {
    config: EngineConfig,
    frame_rate: f64,
    sequence: FrameSequence,
    clip: ClipEditor,
    state: LoadState,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<Result<()>>>,
    progress_rx: Option<Receiver<Progress>>,
}

impl SessionController {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            frame_rate: 0.0,
            sequence: FrameSequence::default(),
            clip: ClipEditor::new(0),
            state: LoadState::Idle,
            cancel: Arc::new(AtomicBool::new(false)),
            worker: None,
            progress_rx: None,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_loading(&self) -> bool {
        self.state == LoadState::Loading
    }

    pub fn frame_rate(&self) -> f64 {
        self.frame_rate
    }

    pub fn frames(&self) -> &FrameSequence {
        &self.sequence
    }

    pub fn clip_range(&self) -> ClipRange {
        self.clip.range()
    }

    /// Spawns the ingestion worker. Replaces any previously captured
    /// sequence.
    pub fn start<S, D, B>(&mut self, source: S, engine: NormalizationEngine<D, B>) -> Result<()>
    where
        S: FrameSource + Send + 'static,
        D: FaceDetector + Send + 'static,
        B: BackgroundRemover + Send + 'static,
    {
        if self.is_loading() {
            return Err(FaceError::Source("a load is already in progress".into()));
        }
        self.frame_rate = source.frame_rate();
        self.sequence.replace(Vec::new());
        self.clip = ClipEditor::new(0);
        self.cancel.store(false, Ordering::Relaxed);

        let (tx, rx) = mpsc::channel();
        self.progress_rx = Some(rx);

        let sequence = self.sequence.clone();
        let cancel = Arc::clone(&self.cancel);
        let config = self.config.clone();
        self.worker = Some(std::thread::spawn(move || {
            ingest(source, engine, &config, &sequence, &cancel, Some(&tx))
        }));
        self.state = LoadState::Loading;
        Ok(())
    }

    /// Progress updates received since the last call.
    pub fn poll_progress(&mut self) -> Vec<Progress> {
        match &self.progress_rx {
            Some(rx) => rx.try_iter().collect(),
            None => Vec::new(),
        }
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Joins the worker and seals the sequence under the clip editor.
    pub fn finish(&mut self) -> Result<LoadState> {
        if let Some(handle) = self.worker.take() {
            handle
                .join()
                .map_err(|_| FaceError::Source("ingestion worker panicked".into()))??;
        }
        self.progress_rx = None;
        self.state = if self.cancel.load(Ordering::Relaxed) {
            LoadState::Cancelled
        } else {
            LoadState::Completed
        };
        self.clip.extend_to(self.sequence.len());
        info!(frames = self.sequence.len(), state = ?self.state, "load finished");
        Ok(self.state)
    }

    /// Clip edits are refused while the worker is still appending.
    pub fn cut_left(&mut self, position: usize) -> bool {
        !self.is_loading() && self.clip.cut_left(position)
    }

    pub fn cut_right(&mut self, position: usize) -> bool {
        !self.is_loading() && self.clip.cut_right(position)
    }

    pub fn restore_clip(&mut self) -> bool {
        !self.is_loading() && self.clip.restore()
    }

    pub fn undo(&mut self) -> bool {
        !self.is_loading() && self.clip.undo()
    }

    pub fn redo(&mut self) -> bool {
        !self.is_loading() && self.clip.redo()
    }

    /// Adopts an already-captured sequence, e.g. from a loaded document.
    pub fn adopt(&mut self, frames: Vec<FrameSnapshot>, frame_rate: f64) {
        let count = frames.len();
        self.sequence.replace(frames);
        self.frame_rate = frame_rate;
        self.clip = ClipEditor::new(count);
        self.state = LoadState::Completed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Detection;
    use crate::normalize::{CANON_PUPIL_DIST, REFERENCE_PD_MM};
    use crate::test_utils::frontal_landmarks;
    use crate::types::{HeadPose, LandmarkSet, Rect, LM_LEFT_PUPIL, LM_RIGHT_PUPIL};
    use image::GrayImage;

    /// Reports the fixture landmarks for portrait images only; the
    /// ingestion loop has to rotate landscape frames to find a face.
    struct StubDetector {
        portrait_only: bool,
    }

    impl FaceDetector for StubDetector {
        fn detect(&mut self, image: &RgbImage) -> Result<Option<Detection>> {
            if self.portrait_only && image.width() >= image.height() {
                return Ok(None);
            }
            Ok(Some(Detection {
                bbox: Rect::new(0.0, 0.0, image.width() as f64, image.height() as f64),
                confidence: 0.99,
            }))
        }

        fn infer_landmarks(
            &mut self,
            _image: &RgbImage,
            _bbox: &Rect,
        ) -> Result<(LandmarkSet, HeadPose)> {
            Ok((frontal_landmarks(), HeadPose::new(2.0, 0.0, 0.0)))
        }
    }

    struct StubRemover;

    impl BackgroundRemover for StubRemover {
        fn remove_background(&mut self, image: &RgbImage) -> Result<GrayImage> {
            Ok(GrayImage::new(image.width(), image.height()))
        }
    }

    struct CannedSource {
        frames: Vec<RgbImage>,
        next: usize,
    }

    impl CannedSource {
        fn new(frames: Vec<RgbImage>) -> Self {
            Self { frames, next: 0 }
        }
    }

    impl FrameSource for CannedSource {
        fn frame_count(&self) -> usize {
            self.frames.len()
        }

        fn frame_rate(&self) -> f64 {
            30.0
        }

        fn next_frame(&mut self) -> Result<Option<RgbImage>> {
            let frame = self.frames.get(self.next).cloned();
            self.next += 1;
            Ok(frame)
        }
    }

    fn engine(detector: StubDetector) -> NormalizationEngine<StubDetector, StubRemover> {
        NormalizationEngine::new(detector, StubRemover, &EngineConfig::default())
    }

    fn square_frames(n: usize) -> Vec<RgbImage> {
        (0..n)
            .map(|_| RgbImage::from_pixel(1024, 1024, image::Rgb([250, 250, 250])))
            .collect()
    }

    #[test]
    fn ingests_canonical_frames() {
        let sequence = FrameSequence::default();
        let cancel = AtomicBool::new(false);
        let source = CannedSource::new(square_frames(3));
        let detector = StubDetector {
            portrait_only: false,
        };
        ingest(
            source,
            engine(detector),
            &EngineConfig::default(),
            &sequence,
            &cancel,
            None,
        )
        .unwrap();

        assert_eq!(sequence.len(), 3);
        let snap = sequence.get(2).unwrap();
        // The fixture pupils sit exactly at the canonical positions, so
        // the crop is an identity and smoothing changes nothing.
        assert_eq!(
            snap.landmarks.pupils().unwrap(),
            (Point::new(640, 480), Point::new(380, 480))
        );
        assert!((snap.pupillary_distance - CANON_PUPIL_DIST).abs() < 1e-9);
        assert!((snap.pix2mm - REFERENCE_PD_MM / CANON_PUPIL_DIST).abs() < 1e-9);
    }

    #[test]
    fn rotation_hypothesis_is_pinned() {
        let sequence = FrameSequence::default();
        let cancel = AtomicBool::new(false);
        // Landscape frames that only detect once rotated to portrait.
        let frames: Vec<RgbImage> = (0..3)
            .map(|_| RgbImage::from_pixel(1024, 512, image::Rgb([250, 250, 250])))
            .collect();
        let source = CannedSource::new(frames);
        let detector = StubDetector {
            portrait_only: true,
        };
        ingest(
            source,
            engine(detector),
            &EngineConfig::default(),
            &sequence,
            &cancel,
            None,
        )
        .unwrap();
        // Every frame recovered via the pinned rotation.
        assert_eq!(sequence.len(), 3);
    }

    #[test]
    fn undetectable_frames_are_skipped() {
        let sequence = FrameSequence::default();
        let cancel = AtomicBool::new(false);
        // Square frames stay square under rotation, so a portrait-only
        // detector never finds a face.
        let source = CannedSource::new(vec![RgbImage::from_pixel(64, 64, image::Rgb([0, 0, 0]))]);
        let detector = StubDetector {
            portrait_only: true,
        };
        ingest(
            source,
            engine(detector),
            &EngineConfig::default(),
            &sequence,
            &cancel,
            None,
        )
        .unwrap();
        assert!(sequence.is_empty());
    }

    /// Collapses the pupils onto one point for a single mid-stream
    /// frame; every other frame carries the fixture landmarks.
    struct GlitchDetector {
        frames_seen: usize,
        bad_frame: usize,
    }

    impl FaceDetector for GlitchDetector {
        fn detect(&mut self, image: &RgbImage) -> Result<Option<Detection>> {
            Ok(Some(Detection {
                bbox: Rect::new(0.0, 0.0, image.width() as f64, image.height() as f64),
                confidence: 0.99,
            }))
        }

        fn infer_landmarks(
            &mut self,
            _image: &RgbImage,
            _bbox: &Rect,
        ) -> Result<(LandmarkSet, HeadPose)> {
            self.frames_seen += 1;
            let mut pts = frontal_landmarks().points().to_vec();
            if self.frames_seen == self.bad_frame {
                pts[LM_LEFT_PUPIL] = pts[LM_RIGHT_PUPIL];
            }
            Ok((LandmarkSet::from_points(pts), HeadPose::new(2.0, 0.0, 0.0)))
        }
    }

    #[test]
    fn degenerate_pupil_frame_is_skipped() {
        let sequence = FrameSequence::default();
        let cancel = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel();
        let source = CannedSource::new(square_frames(3));
        let detector = GlitchDetector {
            frames_seen: 0,
            bad_frame: 2,
        };
        ingest(
            source,
            NormalizationEngine::new(detector, StubRemover, &EngineConfig::default()),
            &EngineConfig::default(),
            &sequence,
            &cancel,
            Some(&tx),
        )
        .unwrap();
        drop(tx);

        // The sibling frames survive the zero-distance pupil pair, and
        // every consumed frame reports progress, skipped or not.
        assert_eq!(sequence.len(), 2);
        assert_eq!(rx.iter().count(), 3);
        let snap = sequence.get(1).unwrap();
        assert!(snap.pupillary_distance > 0.0);
    }

    /// Reports a sideways pupil axis on the first pass and nothing
    /// after, so the tilt-pinned rotation retry loses the face.
    struct SidewaysDetector {
        detections: usize,
    }

    impl FaceDetector for SidewaysDetector {
        fn detect(&mut self, image: &RgbImage) -> Result<Option<Detection>> {
            self.detections += 1;
            if self.detections > 1 {
                return Ok(None);
            }
            Ok(Some(Detection {
                bbox: Rect::new(0.0, 0.0, image.width() as f64, image.height() as f64),
                confidence: 0.99,
            }))
        }

        fn infer_landmarks(
            &mut self,
            _image: &RgbImage,
            _bbox: &Rect,
        ) -> Result<(LandmarkSet, HeadPose)> {
            let mut pts = frontal_landmarks().points().to_vec();
            pts[LM_RIGHT_PUPIL] = Point::new(380, 480);
            pts[LM_LEFT_PUPIL] = Point::new(380, 740);
            Ok((LandmarkSet::from_points(pts), HeadPose::new(2.0, 0.0, 0.0)))
        }
    }

    #[test]
    fn tilt_pinned_retry_still_reports_progress() {
        let sequence = FrameSequence::default();
        let cancel = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel();
        let source = CannedSource::new(square_frames(1));
        let detector = SidewaysDetector { detections: 0 };
        ingest(
            source,
            NormalizationEngine::new(detector, StubRemover, &EngineConfig::default()),
            &EngineConfig::default(),
            &sequence,
            &cancel,
            Some(&tx),
        )
        .unwrap();
        drop(tx);

        assert!(sequence.is_empty());
        assert_eq!(rx.iter().count(), 1);
    }

    #[test]
    fn controller_lifecycle() {
        let mut controller = SessionController::new(EngineConfig::default());
        assert_eq!(controller.state(), LoadState::Idle);

        let source = CannedSource::new(square_frames(2));
        let detector = StubDetector {
            portrait_only: false,
        };
        controller.start(source, engine(detector)).unwrap();
        assert!(controller.is_loading());
        // Edits are refused mid-load.
        assert!(!controller.cut_left(1));

        assert_eq!(controller.finish().unwrap(), LoadState::Completed);
        assert_eq!(controller.frames().len(), 2);
        assert_eq!(controller.clip_range(), ClipRange::new(0, 2));
        assert!(controller.cut_right(1));
        assert_eq!(controller.clip_range(), ClipRange::new(0, 1));
        assert!(controller.undo());
        assert_eq!(controller.clip_range(), ClipRange::new(0, 2));
    }

    #[test]
    fn cancel_stops_ingestion() {
        let sequence = FrameSequence::default();
        let cancel = AtomicBool::new(true);
        let source = CannedSource::new(square_frames(5));
        let detector = StubDetector {
            portrait_only: false,
        };
        ingest(
            source,
            engine(detector),
            &EngineConfig::default(),
            &sequence,
            &cancel,
            None,
        )
        .unwrap();
        assert!(sequence.is_empty());
    }
}
