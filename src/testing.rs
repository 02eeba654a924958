//! Deterministic doubles for the external collaborators

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use image::RgbImage;

use crate::clock::{Clock, StopSignal};
use crate::error::{CoreError, Result};
use crate::input::{InputSink, Key, MouseButton};
use crate::perception::{DigitReader, FrameSource, ObjectDetector, TemplateMatcher};
use crate::types::{BBox, Detection};

/// Virtual time. `sleep` advances it instantly.
#[derive(Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
    sleeps: AtomicUsize,
    stops: Mutex<Vec<(Duration, StopSignal)>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn sleep_calls(&self) -> usize {
        self.sleeps.load(Ordering::SeqCst)
    }

    /// Raise `stop` once virtual time reaches `at`.
    pub fn stop_at(&self, at: Duration, stop: StopSignal) {
        self.stops.lock().unwrap().push((at, stop));
    }

    pub fn advance(&self, by: Duration) {
        let now = {
            let mut now = self.now.lock().unwrap();
            *now += by;
            *now
        };
        for (at, stop) in self.stops.lock().unwrap().iter() {
            if now >= *at {
                stop.request();
            }
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock().unwrap()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        self.advance(duration);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Press { key: Key, hold: Duration, at: Duration },
    Down { key: Key, at: Duration },
    Up { key: Key, at: Duration },
    Click { x: i32, y: i32, button: MouseButton, at: Duration },
}

/// Records every primitive with its virtual timestamp. Clones share the log.
#[derive(Clone)]
pub struct RecordingInput {
    clock: Arc<ManualClock>,
    events: Arc<Mutex<Vec<InputEvent>>>,
    failing: Arc<Mutex<HashSet<Key>>>,
}

impl RecordingInput {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            events: Arc::default(),
            failing: Arc::default(),
        }
    }

    /// Every later press or hold of `key` is rejected.
    pub fn fail_on(&self, key: Key) {
        self.failing.lock().unwrap().insert(key);
    }

    pub fn events(&self) -> Vec<InputEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Keys pressed with `press_and_release`, in order.
    pub fn presses(&self) -> Vec<Key> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                InputEvent::Press { key, .. } => Some(key),
                _ => None,
            })
            .collect()
    }

    pub fn press_count(&self, key: Key) -> usize {
        self.presses().into_iter().filter(|k| *k == key).count()
    }

    pub fn clicks(&self) -> Vec<(i32, i32)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                InputEvent::Click { x, y, .. } => Some((x, y)),
                _ => None,
            })
            .collect()
    }

    /// Keys that are down according to the hold/release log.
    pub fn held(&self) -> HashSet<Key> {
        let mut held = HashSet::new();
        for event in self.events() {
            match event {
                InputEvent::Down { key, .. } => {
                    held.insert(key);
                }
                InputEvent::Up { key, .. } => {
                    held.remove(&key);
                }
                _ => {}
            }
        }
        held
    }

    fn push(&self, event: InputEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn check(&self, key: Key) -> Result<()> {
        if self.failing.lock().unwrap().contains(&key) {
            Err(CoreError::InputInjection(format!("{key:?} rejected")))
        } else {
            Ok(())
        }
    }
}

impl InputSink for RecordingInput {
    fn press_and_release(&mut self, key: Key, hold: Duration) -> Result<()> {
        self.check(key)?;
        let at = self.clock.now();
        self.push(InputEvent::Press { key, hold, at });
        self.clock.sleep(hold);
        Ok(())
    }

    fn hold_key(&mut self, key: Key) -> Result<()> {
        self.check(key)?;
        let at = self.clock.now();
        self.push(InputEvent::Down { key, at });
        Ok(())
    }

    fn release_key(&mut self, key: Key) -> Result<()> {
        let at = self.clock.now();
        self.push(InputEvent::Up { key, at });
        Ok(())
    }

    fn click_at(&mut self, x: i32, y: i32, button: MouseButton) -> Result<()> {
        let at = self.clock.now();
        self.push(InputEvent::Click { x, y, button, at });
        Ok(())
    }
}

type Script = dyn Fn(Duration) -> Vec<Detection> + Send + Sync;

/// Detections as a function of virtual time.
pub struct ScriptedDetector {
    clock: Arc<ManualClock>,
    script: Box<Script>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedDetector {
    pub fn new(
        clock: Arc<ManualClock>,
        script: impl Fn(Duration) -> Vec<Detection> + Send + Sync + 'static,
    ) -> Self {
        Self {
            clock,
            script: Box::new(script),
            calls: Arc::default(),
        }
    }

    /// Always returns the same detections.
    pub fn fixed(clock: Arc<ManualClock>, detections: Vec<Detection>) -> Self {
        Self::new(clock, move |_| detections.clone())
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl ObjectDetector for ScriptedDetector {
    fn detect(&self, _frame: &RgbImage) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok((self.script)(self.clock.now()))
    }
}

/// Template hits keyed by pattern id.
#[derive(Default)]
pub struct FixedTemplates {
    hits: HashMap<String, Vec<BBox>>,
}

impl FixedTemplates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, pattern: &str, boxes: Vec<BBox>) -> Self {
        self.hits.insert(pattern.to_string(), boxes);
        self
    }
}

impl TemplateMatcher for FixedTemplates {
    fn match_template(&self, _frame: &RgbImage, pattern: &str, _threshold: f32) -> Result<Vec<BBox>> {
        Ok(self.hits.get(pattern).cloned().unwrap_or_default())
    }
}

/// Returns the same OCR text for every region; `None` fails the read.
pub struct FixedOcr {
    text: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl FixedOcr {
    pub fn new(text: Option<&str>) -> Self {
        Self {
            text: text.map(str::to_string),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl DigitReader for FixedOcr {
    fn read_digits(&self, _image: &RgbImage, _allowed: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.text
            .clone()
            .ok_or_else(|| CoreError::PerceptionMiss("no text".into()))
    }
}

/// Produces a copy of one image on every capture.
pub struct BlankFrames {
    frame: RgbImage,
}

impl BlankFrames {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            frame: RgbImage::new(width, height),
        }
    }

    pub fn from_image(frame: RgbImage) -> Self {
        Self { frame }
    }
}

impl Default for BlankFrames {
    fn default() -> Self {
        Self::new(1067, 600)
    }
}

impl FrameSource for BlankFrames {
    fn capture_frame(&self) -> Result<RgbImage> {
        Ok(self.frame.clone())
    }
}
