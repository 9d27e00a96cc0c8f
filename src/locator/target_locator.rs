//! Pixel-only target localisation funnel: OCR exact, then OCR fuzzy with model
//! disambiguation, then the vision model.
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::config::LocatorConfig;
use crate::llm::oracle::{parse_selection_index, ReasoningModel};
use crate::locator::search_text::extract_search_texts;
use crate::locator::vision::{build_location_prompt, parse_vision_reply};
use crate::perception::ocr::{find_in_words, OcrEngine};
use crate::perception::pointer::PointerSource;
use crate::perception::screenshot::Screenshot;
use crate::perception::types::OcrWord;
use crate::strategy::{LadderTrace, Step};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocateMethod {
    OcrExact,
    OcrFuzzy,
    VisionAi,
    OcrApproximate,
    Failed,
}

impl LocateMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocateMethod::OcrExact => "ocr_exact",
            LocateMethod::OcrFuzzy => "ocr_fuzzy",
            LocateMethod::VisionAi => "vision_ai",
            LocateMethod::OcrApproximate => "ocr_approximate",
            LocateMethod::Failed => "failed",
        }
    }
}

/// Outcome of one funnel run. A successful result always carries coordinates.
///
/// `confidence` keeps the scale of its source: OCR levels report 0–100, the vision level
/// and the coarse locator 0–1. Use [`LocationResult::normalized_confidence`] to compare.
#[derive(Debug, Clone, Serialize)]
pub struct LocationResult {
    success: bool,
    coordinates: Option<(i32, i32)>,
    method: LocateMethod,
    confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    metadata: Map<String, Value>,
    trace: LadderTrace,
}

impl LocationResult {
    pub fn found(
        coordinates: (i32, i32),
        method: LocateMethod,
        confidence: f64,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            success: true,
            coordinates: Some(coordinates),
            method,
            confidence,
            error: None,
            metadata,
            trace: LadderTrace::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            coordinates: None,
            method: LocateMethod::Failed,
            confidence: 0.0,
            error: Some(error.into()),
            metadata: Map::new(),
            trace: LadderTrace::new(),
        }
    }

    fn with_trace(mut self, trace: LadderTrace) -> Self {
        self.trace = trace;
        self
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn coordinates(&self) -> Option<(i32, i32)> {
        self.coordinates
    }

    pub fn method(&self) -> LocateMethod {
        self.method
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn trace(&self) -> &LadderTrace {
        &self.trace
    }

    pub fn normalized_confidence(&self) -> f64 {
        match self.method {
            LocateMethod::OcrExact | LocateMethod::OcrFuzzy => (self.confidence / 100.0).clamp(0.0, 1.0),
            _ => self.confidence.clamp(0.0, 1.0),
        }
    }
}

fn metadata(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub struct TargetLocator {
    ocr: Option<Arc<dyn OcrEngine>>,
    model: Option<Arc<dyn ReasoningModel>>,
    fuzzy_candidate_limit: usize,
    default_vision_confidence: f64,
    approximate_confidence: f64,
}

impl TargetLocator {
    pub fn new(
        config: &LocatorConfig,
        ocr: Option<Arc<dyn OcrEngine>>,
        model: Option<Arc<dyn ReasoningModel>>,
    ) -> Self {
        Self {
            ocr,
            model,
            fuzzy_candidate_limit: config.fuzzy_candidate_limit.max(1),
            default_vision_confidence: config.default_vision_confidence,
            approximate_confidence: config.approximate_confidence,
        }
    }

    /// Runs the funnel, stopping at the first level that yields a location.
    pub async fn find_target(
        &self,
        shot: &Screenshot,
        description: &str,
        use_ocr: bool,
        use_vision: bool,
    ) -> LocationResult {
        tracing::info!(description, use_ocr, use_vision, "locating target");
        let mut trace = LadderTrace::new();

        if use_ocr {
            let words = self.ocr_words(shot).await;
            let step = match &words {
                Step::Ok(words) => self.ocr_exact(words, description),
                Step::Skip(r) => Step::Skip(r.clone()),
                Step::Fail(r) => Step::Fail(r.clone()),
            };
            trace.record("ocr_exact", &step);
            if let Step::Ok(found) = step {
                return self.finish(found, trace);
            }

            let step = match &words {
                Step::Ok(words) => self.ocr_fuzzy(words, description).await,
                Step::Skip(r) | Step::Fail(r) => Step::skip(r.clone()),
            };
            trace.record("ocr_fuzzy", &step);
            if let Step::Ok(found) = step {
                return self.finish(found, trace);
            }
        } else {
            trace.record::<()>("ocr", &Step::skip("disabled by caller"));
        }

        let step = if use_vision {
            self.vision(shot, description).await
        } else {
            Step::skip("disabled by caller")
        };
        trace.record("vision_ai", &step);
        if let Step::Ok(found) = step {
            return self.finish(found, trace);
        }

        tracing::warn!(description, trace = %trace.summary(), "target not located");
        LocationResult::failed(format!("Could not locate target: {description}")).with_trace(trace)
    }

    /// Single-shot coarse location for an external fine-tuning loop: OCR levels only,
    /// falling back to the current pointer position.
    pub async fn find_target_with_remote_guidance(
        &self,
        shot: &Screenshot,
        description: &str,
        pointer: &dyn PointerSource,
    ) -> LocationResult {
        tracing::info!(description, "coarse locating target");
        let mut trace = LadderTrace::new();

        let mut approximate = None;
        let words = self.ocr_words(shot).await;
        if let Step::Ok(words) = &words {
            let step = self.ocr_exact(words, description);
            trace.record("ocr_exact", &step);
            approximate = step.ok();
            if approximate.is_none() {
                let step = self.ocr_fuzzy(words, description).await;
                trace.record("ocr_fuzzy", &step);
                approximate = step.ok();
            }
        } else {
            trace.record("ocr", &words);
        }

        let ocr_used = approximate.is_some();
        let coordinates = match approximate.and_then(|r| r.coordinates) {
            Some(c) => c,
            None => match pointer.position().await {
                Ok(pos) => {
                    trace.record("pointer", &Step::Ok(pos));
                    pos
                }
                Err(e) => {
                    let step: Step<()> = Step::fail(e.to_string());
                    trace.record("pointer", &step);
                    return LocationResult::failed(format!("Could not locate target: {description}"))
                        .with_trace(trace);
                }
            },
        };

        tracing::info!(description, x = coordinates.0, y = coordinates.1, ocr_used, "coarse location ready");
        LocationResult::found(
            coordinates,
            LocateMethod::OcrApproximate,
            self.approximate_confidence,
            metadata(json!({
                "requires_fine_tuning": true,
                "ocr_used": ocr_used,
                "description": description,
            })),
        )
        .with_trace(trace)
    }

    fn finish(&self, found: LocationResult, trace: LadderTrace) -> LocationResult {
        tracing::info!(
            method = found.method.as_str(),
            coordinates = ?found.coordinates,
            confidence = found.confidence,
            "target located"
        );
        found.with_trace(trace)
    }

    async fn ocr_words(&self, shot: &Screenshot) -> Step<Vec<OcrWord>> {
        let Some(ocr) = &self.ocr else {
            return Step::skip("no OCR engine");
        };
        match ocr.analyze(shot).await {
            Ok(words) if words.is_empty() => Step::fail("no text on screen"),
            Ok(words) => Step::Ok(words),
            Err(e) if e.is_unavailable() => Step::skip(e.to_string()),
            Err(e) => Step::fail(e.to_string()),
        }
    }

    fn ocr_exact(&self, words: &[OcrWord], description: &str) -> Step<LocationResult> {
        let texts = extract_search_texts(description);
        if texts.is_empty() {
            return Step::skip("no literal text in description");
        }
        for text in &texts {
            let best = find_in_words(words, text)
                .into_iter()
                .max_by(|a, b| a.confidence.total_cmp(&b.confidence));
            if let Some(hit) = best {
                tracing::debug!(search_text = %text, found_text = %hit.text, "OCR exact hit");
                return Step::Ok(LocationResult::found(
                    hit.center(),
                    LocateMethod::OcrExact,
                    hit.confidence,
                    metadata(json!({
                        "search_text": text,
                        "found_text": hit.text,
                        "bounding_box": hit.bbox,
                    })),
                ));
            }
        }
        Step::fail(format!("none of {texts:?} on screen"))
    }

    async fn ocr_fuzzy(&self, words: &[OcrWord], description: &str) -> Step<LocationResult> {
        let Some(model) = &self.model else {
            return Step::skip("no reasoning model");
        };
        let shown = &words[..words.len().min(self.fuzzy_candidate_limit)];
        let prompt = fuzzy_prompt(shown, description);
        let reply = match model.infer(&prompt, None).await {
            Ok(reply) => reply,
            Err(e) if e.is_unavailable() => return Step::skip(e.to_string()),
            Err(e) => return Step::fail(e.to_string()),
        };
        let Some(index) = parse_selection_index(&reply, shown.len()) else {
            return Step::fail(format!("no usable selection in reply {:?}", reply.trim()));
        };
        let word = &shown[index];
        Step::Ok(LocationResult::found(
            word.center(),
            LocateMethod::OcrFuzzy,
            word.confidence,
            metadata(json!({
                "matched_text": word.text,
                "bounding_box": word.bbox,
                "ai_selection": index + 1,
            })),
        ))
    }

    async fn vision(&self, shot: &Screenshot, description: &str) -> Step<LocationResult> {
        let Some(model) = &self.model else {
            return Step::skip("no vision model");
        };
        let png = match shot.png_bytes() {
            Ok(png) => png,
            Err(e) => return Step::fail(e.to_string()),
        };
        let prompt = build_location_prompt(description, shot.width(), shot.height());
        let reply = match model.infer(&prompt, Some(&png)).await {
            Ok(reply) => reply,
            Err(e) if e.is_unavailable() => return Step::skip(e.to_string()),
            Err(e) => return Step::fail(e.to_string()),
        };
        match parse_vision_reply(&reply, shot.width(), shot.height(), self.default_vision_confidence) {
            Ok(hit) => Step::Ok(LocationResult::found(
                hit.center,
                LocateMethod::VisionAi,
                hit.confidence,
                metadata(json!({
                    "box": hit.bbox,
                    "coordinate_source": hit.source,
                    "description": description,
                })),
            )),
            Err(reason) => Step::fail(reason),
        }
    }
}

fn fuzzy_prompt(words: &[OcrWord], description: &str) -> String {
    let listing = words
        .iter()
        .enumerate()
        .map(|(i, w)| {
            format!(
                "{}. '{}' at ({}, {}, {}, {}) (confidence: {:.2})",
                i + 1,
                w.text,
                w.bbox.x,
                w.bbox.y,
                w.bbox.width,
                w.bbox.height,
                w.confidence
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Given the following text elements found on screen with their coordinates, \
         which element best matches the description: '{description}'?\n\n\
         Elements found:\n{listing}\n\n\
         Respond ONLY with the number of the matching element (1-{}), or '0' if none match.\n\
         Do not provide any explanation, just the number.",
        words.len()
    )
}
