//! Pipeline scheduler: drives capture → recognize → filter → translate →
//! publish cycles on a fixed interval, on a background thread, without
//! ever blocking the render tick that calls [`Scheduler::tick`].

use crate::cache::TranslationCache;
use crate::capture::{Bounds, Capture};
use crate::ocr::{collect_regions, filter_by_confidence, BoundingBox, Recognizer};
use crate::translate::Translator;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

// --- PUBLISHED SUBTITLE ---

/// A translated fragment pinned to the screen region it was read from.
#[derive(Clone, Debug, PartialEq)]
pub struct Fragment {
    pub text: String,
    /// Captured-image pixel coordinates.
    pub bounding_box: BoundingBox,
}

/// Geometry of the cycle that produced a subtitle, used by the overlay to
/// follow the captured window across displays.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Placement {
    pub window_bounds: Bounds,
    pub display_bounds: Bounds,
    pub image_size: (u32, u32),
}

/// What the overlay displays. Written only by the pipeline's publish
/// step; the render tick takes read-only snapshots.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Subtitle {
    /// Banner-mode text (pre-wrap).
    pub text: String,
    /// Inplace-mode fragments.
    pub fragments: Vec<Fragment>,
    pub placement: Option<Placement>,
}

impl Subtitle {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.fragments.is_empty()
    }

    fn cleared(placement: Placement) -> Self {
        Subtitle {
            text: String::new(),
            fragments: Vec::new(),
            placement: Some(placement),
        }
    }
}

/// Single-writer many-reader slot holding the last published subtitle.
/// Readers always observe a complete value, never a partial update.
#[derive(Clone, Default)]
pub struct SubtitleSlot {
    inner: Arc<Mutex<(Subtitle, u64)>>,
}

impl SubtitleSlot {
    /// Atomically replaces the subtitle. Publishing a value equal to the
    /// current one is a no-op so the renderer skips redundant re-layout.
    pub fn publish(&self, subtitle: Subtitle) {
        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if guard.0 == subtitle {
            return;
        }
        guard.1 += 1;
        guard.0 = subtitle;
    }

    /// `(subtitle, generation)`; the generation changes iff the subtitle
    /// changed.
    pub fn snapshot(&self) -> (Subtitle, u64) {
        let guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.clone()
    }
}

// --- PIPELINE WORKER ---

/// Which shape of cycle to run. `Mode::Off` never reaches the scheduler.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CycleKind {
    Banner,
    Inplace,
}

/// Everything one cycle needs. Entered only by the single in-flight
/// cycle thread (the scheduler's gate guarantees exclusivity; the mutex
/// satisfies the compiler and survives a poisoned panic).
pub struct PipelineWorker {
    pub capture: Box<dyn Capture>,
    pub recognizer: Box<dyn Recognizer>,
    pub translator: Box<dyn Translator>,
    pub cache: TranslationCache,
    pub window_title: String,
    pub confidence_threshold: f32,
    /// Persist every captured frame to disk (--debug).
    pub dump_frames: bool,
}

impl PipelineWorker {
    /// One end-to-end cycle. All failures are logged and abandoned for
    /// this interval; the previously published subtitle stays up.
    pub fn run_cycle(&mut self, kind: CycleKind, slot: &SubtitleSlot) {
        let frame = match self.capture.capture(&self.window_title) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("capture failed: {e:#}");
                return;
            }
        };

        if self.dump_frames {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis())
                .unwrap_or_default();
            let path = format!("screenshot-{millis}.png");
            if let Err(e) = frame.image.save(&path) {
                warn!("could not save debug frame {path}: {e}");
            }
        }

        let result = match self.recognizer.recognize(&frame.image) {
            Ok(result) => result,
            Err(e) => {
                warn!("recognition failed: {e:#}");
                return;
            }
        };

        let placement = Placement {
            window_bounds: frame.window_bounds,
            display_bounds: frame.display_bounds,
            image_size: frame.image.dimensions(),
        };

        match kind {
            CycleKind::Banner => self.banner_cycle(&result, placement, slot),
            CycleKind::Inplace => self.inplace_cycle(&result, placement, slot),
        }
    }

    fn banner_cycle(
        &mut self,
        result: &crate::ocr::RecognitionResult,
        placement: Placement,
        slot: &SubtitleSlot,
    ) {
        let text = filter_by_confidence(result, self.confidence_threshold);
        if text.is_empty() {
            debug!(
                "[ocr] no text above confidence threshold {}",
                self.confidence_threshold
            );
            slot.publish(Subtitle::cleared(placement));
            return;
        }
        info!("[ocr] {text}");

        let (translation, cached) = match self.cache.resolve(&text, &*self.translator) {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("translation failed: {e:#}");
                return;
            }
        };
        if cached {
            debug!(
                "[subs] cache hit (last seen {:?} ago)",
                self.cache.current_age().unwrap_or_default()
            );
        }
        info!("[subs] {translation}");

        slot.publish(Subtitle {
            text: translation,
            fragments: Vec::new(),
            placement: Some(placement),
        });
    }

    fn inplace_cycle(
        &mut self,
        result: &crate::ocr::RecognitionResult,
        placement: Placement,
        slot: &SubtitleSlot,
    ) {
        let regions = collect_regions(result, self.confidence_threshold);
        if regions.is_empty() {
            debug!(
                "[ocr] no regions above confidence threshold {}",
                self.confidence_threshold
            );
            slot.publish(Subtitle::cleared(placement));
            return;
        }

        // A frame's regions must all fit, or the per-region resolves
        // below would evict each other in rotation every cycle.
        self.cache.ensure_capacity(regions.len());

        let mut fragments = Vec::with_capacity(regions.len());
        for region in &regions {
            info!("[ocr] {}", region.text);
            let (translation, _) = match self.cache.resolve(&region.text, &*self.translator) {
                Ok(resolved) => resolved,
                Err(e) => {
                    warn!("translation failed: {e:#}");
                    return;
                }
            };
            info!("[subs] {translation}");
            fragments.push(Fragment {
                text: translation,
                bounding_box: region.bounding_box,
            });
        }

        slot.publish(Subtitle {
            text: String::new(),
            fragments,
            placement: Some(placement),
        });
    }
}

// --- SCHEDULER ---

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TickOutcome {
    /// The refresh interval has not elapsed.
    NotDue,
    /// A cycle was started on a background thread.
    Started,
    /// Due, but the previous cycle is still running; skipped and logged.
    SkippedBusy,
}

pub struct Scheduler {
    worker: Arc<Mutex<PipelineWorker>>,
    slot: SubtitleSlot,
    in_flight: Arc<AtomicBool>,
    refresh_rate: Duration,
    last_cycle_start: Option<Instant>,
}

impl Scheduler {
    pub fn new(worker: PipelineWorker, refresh_rate: Duration) -> Self {
        Self {
            worker: Arc::new(Mutex::new(worker)),
            slot: SubtitleSlot::default(),
            in_flight: Arc::new(AtomicBool::new(false)),
            refresh_rate,
            last_cycle_start: None,
        }
    }

    /// Handle for render-side reads of the published subtitle.
    pub fn slot(&self) -> SubtitleSlot {
        self.slot.clone()
    }

    /// Cheap per-tick due-check. When due, starts at most one background
    /// cycle; a cycle still running from a previous interval makes this
    /// interval a no-op instead of piling up concurrent work.
    pub fn tick(&mut self, now: Instant, kind: CycleKind) -> TickOutcome {
        if let Some(last) = self.last_cycle_start {
            if now < last + self.refresh_rate {
                return TickOutcome::NotDue;
            }
        }
        self.last_cycle_start = Some(now);

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("previous pipeline cycle still running; skipping this interval");
            return TickOutcome::SkippedBusy;
        }

        let worker = self.worker.clone();
        let slot = self.slot.clone();
        let in_flight = self.in_flight.clone();
        std::thread::spawn(move || {
            {
                let mut guard = match worker.lock() {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                };
                guard.run_cycle(kind, &slot);
            }
            in_flight.store(false, Ordering::SeqCst);
        });
        TickOutcome::Started
    }

    /// True while a background cycle is running.
    pub fn cycle_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }
}

// --- TESTS ---

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{Bounds, Capture, Frame};
    use crate::ocr::tests::{single_block, word};
    use crate::ocr::{Block, Paragraph, RecognitionResult};
    use anyhow::{anyhow, Result};
    use std::sync::atomic::AtomicUsize;

    struct FixedCapture {
        concurrent: Arc<AtomicUsize>,
        max_concurrent: Arc<AtomicUsize>,
        delay: Duration,
        fail: bool,
    }

    impl FixedCapture {
        fn instant() -> Self {
            Self {
                concurrent: Arc::new(AtomicUsize::new(0)),
                max_concurrent: Arc::new(AtomicUsize::new(0)),
                delay: Duration::ZERO,
                fail: false,
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::instant()
            }
        }
    }

    impl Capture for FixedCapture {
        fn capture(&self, _title: &str) -> Result<Frame> {
            let running = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(running, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("window not found"));
            }
            Ok(Frame {
                image: image::RgbaImage::new(8, 8),
                window_bounds: Bounds {
                    x: 100,
                    y: 50,
                    width: 8,
                    height: 8,
                },
                display_bounds: Bounds {
                    x: 0,
                    y: 0,
                    width: 1920,
                    height: 1080,
                },
            })
        }
    }

    struct FixedRecognizer {
        result: RecognitionResult,
    }

    impl Recognizer for FixedRecognizer {
        fn recognize(&self, _image: &image::RgbaImage) -> Result<RecognitionResult> {
            Ok(self.result.clone())
        }
    }

    struct CountingTranslator {
        calls: Arc<AtomicUsize>,
    }

    impl Translator for CountingTranslator {
        fn translate(&self, text: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("<{text}>"))
        }
    }

    fn worker_with(
        capture: FixedCapture,
        result: RecognitionResult,
    ) -> (PipelineWorker, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let worker = PipelineWorker {
            capture: Box::new(capture),
            recognizer: Box::new(FixedRecognizer { result }),
            translator: Box::new(CountingTranslator {
                calls: calls.clone(),
            }),
            cache: TranslationCache::default(),
            window_title: "Game".to_string(),
            confidence_threshold: 0.6,
            dump_frames: false,
        };
        (worker, calls)
    }

    #[test]
    fn cycle_publishes_translated_subtitle() {
        let (mut worker, _) = worker_with(
            FixedCapture::instant(),
            single_block(vec![word("hello", 0.95)]),
        );
        let slot = SubtitleSlot::default();
        worker.run_cycle(CycleKind::Banner, &slot);

        let (subtitle, generation) = slot.snapshot();
        assert_eq!(subtitle.text, "<hello>");
        assert_eq!(generation, 1);
        let placement = subtitle.placement.unwrap();
        assert_eq!(placement.window_bounds.x, 100);
        assert_eq!(placement.image_size, (8, 8));
    }

    #[test]
    fn empty_extraction_clears_the_subtitle() {
        let (mut worker, calls) = worker_with(
            FixedCapture::instant(),
            single_block(vec![word("faint", 0.1)]),
        );
        let slot = SubtitleSlot::default();
        slot.publish(Subtitle {
            text: "stale".to_string(),
            fragments: Vec::new(),
            placement: None,
        });

        worker.run_cycle(CycleKind::Banner, &slot);

        let (subtitle, _) = slot.snapshot();
        assert!(subtitle.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn identical_text_across_cycles_translates_once() {
        let (mut worker, calls) = worker_with(
            FixedCapture::instant(),
            single_block(vec![word("こんにちは", 0.95)]),
        );
        let slot = SubtitleSlot::default();
        worker.run_cycle(CycleKind::Banner, &slot);
        worker.run_cycle(CycleKind::Banner, &slot);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(slot.snapshot().0.text, "<こんにちは>");
    }

    #[test]
    fn capture_failure_retains_previous_subtitle() {
        let capture = FixedCapture {
            fail: true,
            ..FixedCapture::instant()
        };
        let (mut worker, _) = worker_with(capture, single_block(vec![word("hello", 0.95)]));
        let slot = SubtitleSlot::default();
        slot.publish(Subtitle {
            text: "previous".to_string(),
            fragments: Vec::new(),
            placement: None,
        });

        worker.run_cycle(CycleKind::Banner, &slot);
        assert_eq!(slot.snapshot().0.text, "previous");
    }

    #[test]
    fn republishing_identical_subtitle_keeps_generation() {
        let slot = SubtitleSlot::default();
        let subtitle = Subtitle {
            text: "same".to_string(),
            fragments: Vec::new(),
            placement: None,
        };
        slot.publish(subtitle.clone());
        let (_, gen1) = slot.snapshot();
        slot.publish(subtitle);
        let (_, gen2) = slot.snapshot();
        assert_eq!(gen1, gen2);
    }

    #[test]
    fn inplace_cycle_pins_fragments_to_regions() {
        let (mut worker, _) = worker_with(
            FixedCapture::instant(),
            single_block(vec![word("door", 0.9)]),
        );
        let slot = SubtitleSlot::default();
        worker.run_cycle(CycleKind::Inplace, &slot);

        let (subtitle, _) = slot.snapshot();
        assert_eq!(subtitle.fragments.len(), 1);
        assert_eq!(subtitle.fragments[0].text, "<door>");
        assert_eq!(subtitle.fragments[0].bounding_box.min_x, 10.0);
    }

    #[test]
    fn static_inplace_scene_translates_each_region_once() {
        let mut result = RecognitionResult::default();
        for (i, text) in ["alpha", "bravo", "charlie", "delta", "echo"]
            .into_iter()
            .enumerate()
        {
            result.blocks.push(Block {
                paragraphs: vec![Paragraph {
                    words: vec![word(text, 0.9)],
                }],
                bounding_box: BoundingBox {
                    min_x: 0.0,
                    min_y: i as f32 * 30.0,
                    max_x: 100.0,
                    max_y: i as f32 * 30.0 + 20.0,
                },
            });
        }
        let (mut worker, calls) = worker_with(FixedCapture::instant(), result);
        let slot = SubtitleSlot::default();

        // Same five regions on screen across consecutive cycles: every
        // region translates exactly once, even past the default cache size.
        worker.run_cycle(CycleKind::Inplace, &slot);
        worker.run_cycle(CycleKind::Inplace, &slot);

        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(slot.snapshot().0.fragments.len(), 5);
    }

    #[test]
    fn at_most_one_cycle_in_flight() {
        let capture = FixedCapture::slow(Duration::from_millis(40));
        let concurrent_max = capture.max_concurrent.clone();
        let (worker, _) = worker_with(capture, single_block(vec![word("hello", 0.9)]));

        let mut scheduler = Scheduler::new(worker, Duration::from_millis(1));
        let mut started = 0;
        let mut skipped = 0;
        for _ in 0..20 {
            match scheduler.tick(Instant::now(), CycleKind::Banner) {
                TickOutcome::Started => started += 1,
                TickOutcome::SkippedBusy => skipped += 1,
                TickOutcome::NotDue => {}
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        while scheduler.cycle_in_flight() {
            std::thread::sleep(Duration::from_millis(5));
        }

        assert_eq!(concurrent_max.load(Ordering::SeqCst), 1);
        assert!(started >= 1);
        assert!(skipped >= 1);
    }

    #[test]
    fn tick_before_interval_elapses_is_not_due() {
        let (worker, _) = worker_with(
            FixedCapture::instant(),
            single_block(vec![word("hello", 0.9)]),
        );
        let mut scheduler = Scheduler::new(worker, Duration::from_secs(3600));

        let t0 = Instant::now();
        assert_eq!(scheduler.tick(t0, CycleKind::Banner), TickOutcome::Started);
        assert_eq!(
            scheduler.tick(t0 + Duration::from_secs(1), CycleKind::Banner),
            TickOutcome::NotDue
        );
    }
}
