//! Perception collaborators and the per-frame observation
//!
//! The detector, template matcher and OCR engine live outside the crate.
//! `PerceptionContext` is built once with all of them and handed to every
//! component that needs to look at the screen; nothing is global.

use std::sync::Arc;
use std::time::Duration;

use image::{imageops, RgbImage};
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::config::{CaptureConfig, CoreConfig, PerceptionConfig};
use crate::detection::clip_region;
use crate::error::{CoreError, Result};
use crate::status::{check_stage_timing, StageTiming};
use crate::types::{BBox, Detection, DetectionSource, Label, MacroState, Point};

pub trait FrameSource {
    fn capture_frame(&self) -> Result<RgbImage>;
}

/// Learned detector returning labelled boxes.
pub trait ObjectDetector {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>>;
}

/// Fixed-pattern matching; returns every box above `threshold`.
pub trait TemplateMatcher {
    fn match_template(&self, frame: &RgbImage, pattern: &str, threshold: f32) -> Result<Vec<BBox>>;
}

pub trait DigitReader {
    fn read_digits(&self, image: &RgbImage, allowed: &str) -> Result<String>;
}

/// Drops boxes the rest of the core cannot reason about.
pub fn is_valid_detection(d: &Detection) -> bool {
    if d.bbox.is_empty() {
        return false;
    }
    match d.confidence {
        Some(c) => (0.0..=1.0).contains(&c),
        None => true,
    }
}

/// One frame and everything seen in it.
#[derive(Debug, Clone)]
pub struct Observation {
    pub frame: RgbImage,
    pub detections: Vec<Detection>,
    pub captured_at: Duration,
    pub timings: Vec<StageTiming>,
    pub foot_offset: i32,
}

impl Observation {
    pub fn new(frame: RgbImage, detections: Vec<Detection>, captured_at: Duration) -> Self {
        Self {
            frame,
            detections,
            captured_at,
            timings: Vec::new(),
            foot_offset: 0,
        }
    }

    pub fn with_foot_offset(mut self, offset: i32) -> Self {
        self.foot_offset = offset;
        self
    }

    pub fn of_label(&self, label: Label) -> impl Iterator<Item = &Detection> {
        self.detections.iter().filter(move |d| d.label == label)
    }

    pub fn has(&self, label: Label) -> bool {
        self.of_label(label).next().is_some()
    }

    /// Feet of the most confident agent box.
    pub fn agent_position(&self) -> Option<Point> {
        self.of_label(Label::Agent)
            .max_by(|a, b| {
                let ca = a.confidence.unwrap_or(0.0);
                let cb = b.confidence.unwrap_or(0.0);
                ca.total_cmp(&cb)
            })
            .map(|d| {
                let c = d.centroid();
                Point::new(c.x, c.y + self.foot_offset)
            })
    }

    pub fn macro_state(&self) -> MacroState {
        MacroState::classify(&self.detections)
    }
}

pub struct PerceptionContext {
    frames: Box<dyn FrameSource>,
    detector: Box<dyn ObjectDetector>,
    templates: Box<dyn TemplateMatcher>,
    ocr: Box<dyn DigitReader>,
    clock: Arc<dyn Clock>,
    config: PerceptionConfig,
    capture: CaptureConfig,
}

impl PerceptionContext {
    pub fn new(
        frames: Box<dyn FrameSource>,
        detector: Box<dyn ObjectDetector>,
        templates: Box<dyn TemplateMatcher>,
        ocr: Box<dyn DigitReader>,
        clock: Arc<dyn Clock>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            frames,
            detector,
            templates,
            ocr,
            clock,
            config: config.perception.clone(),
            capture: config.capture.clone(),
        }
    }

    pub fn config(&self) -> &PerceptionConfig {
        &self.config
    }

    pub fn capture_frame(&self) -> Result<RgbImage> {
        self.frames.capture_frame()
    }

    /// Capture, detect and template-match one frame.
    pub fn observe(&self) -> Result<Observation> {
        let start = self.clock.now();
        let frame = self.frames.capture_frame()?;
        let captured_at = self.clock.now();
        let capture = check_stage_timing(
            "capture",
            captured_at.saturating_sub(start),
            self.capture.capture_budget_ms,
        );

        let mut detections = self.detector.detect(&frame)?;
        for spec in &self.config.templates {
            match self.templates.match_template(&frame, &spec.pattern, spec.threshold) {
                Ok(boxes) => detections.extend(boxes.into_iter().map(|b| {
                    Detection::new(spec.label, b).with_source(DetectionSource::TemplateMatch)
                })),
                // a broken pattern must not blind the detector output
                Err(e) => warn!(pattern = %spec.pattern, error = %e, "template match failed"),
            }
        }
        let before = detections.len();
        detections.retain(is_valid_detection);
        if detections.len() != before {
            debug!(dropped = before - detections.len(), "invalid detections dropped");
        }
        let detect = check_stage_timing(
            "detect",
            self.clock.now().saturating_sub(captured_at),
            self.capture.detect_budget_ms,
        );
        for timing in [&capture, &detect] {
            if timing.over_budget {
                debug!(stage = %timing.stage, latency_ms = timing.latency_ms, "stage over budget");
            }
        }

        let mut observation = Observation::new(frame, detections, captured_at)
            .with_foot_offset(self.config.agent_foot_offset);
        observation.timings = vec![capture, detect];
        Ok(observation)
    }

    pub fn find_template(&self, frame: &RgbImage, pattern: &str, threshold: f32) -> Result<Vec<BBox>> {
        self.templates.match_template(frame, pattern, threshold)
    }

    /// Crop `region` out of `frame` and OCR it.
    pub fn read_digits(&self, frame: &RgbImage, region: BBox, allowed: &str) -> Result<String> {
        let r = clip_region(frame, region)
            .ok_or_else(|| CoreError::PerceptionMiss(format!("OCR region {region:?} off frame")))?;
        let crop = imageops::crop_imm(
            frame,
            r.x1 as u32,
            r.y1 as u32,
            r.width() as u32,
            r.height() as u32,
        )
        .to_image();
        self.ocr.read_digits(&crop, allowed)
    }
}
