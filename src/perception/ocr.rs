//! Word-level OCR.
//!
//! [`TesseractOcr`] shells out to the `tesseract` CLI and parses its TSV output; a missing
//! binary is reported as [`PinpointError::BackendUnavailable`] so callers can skip OCR.
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::config::OcrConfig;
use crate::errors::{PinpointError, PinpointResult};
use crate::perception::screenshot::Screenshot;
use crate::perception::types::{BoundingBox, OcrWord};

#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    /// All recognised words in scan order.
    async fn analyze(&self, shot: &Screenshot) -> PinpointResult<Vec<OcrWord>>;

    async fn extract_text(&self, shot: &Screenshot) -> PinpointResult<String> {
        let words = self.analyze(shot).await?;
        Ok(words.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" "))
    }

    /// Case-insensitive search; multi-word needles match runs of words on one line.
    async fn locate_text(&self, shot: &Screenshot, needle: &str) -> PinpointResult<Vec<OcrWord>> {
        let words = self.analyze(shot).await?;
        Ok(find_in_words(&words, needle))
    }
}

pub fn find_in_words(words: &[OcrWord], needle: &str) -> Vec<OcrWord> {
    let needle = needle.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }
    let span = needle.split_whitespace().count().max(1);
    if span == 1 {
        return words
            .iter()
            .filter(|w| w.text.to_lowercase().contains(&needle))
            .cloned()
            .collect();
    }

    let mut hits = Vec::new();
    for run in words.windows(span) {
        if !same_row(run) {
            continue;
        }
        let joined = run
            .iter()
            .map(|w| w.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if joined.contains(&needle) {
            hits.push(merge(run));
        }
    }
    hits
}

fn same_row(run: &[OcrWord]) -> bool {
    let first = run[0].bbox;
    let (_, cy) = first.center();
    run.iter().all(|w| (w.center().1 - cy).abs() <= first.height.max(w.bbox.height))
}

fn merge(run: &[OcrWord]) -> OcrWord {
    let x1 = run.iter().map(|w| w.bbox.x).min().unwrap_or(0);
    let y1 = run.iter().map(|w| w.bbox.y).min().unwrap_or(0);
    let x2 = run.iter().map(|w| w.bbox.x + w.bbox.width).max().unwrap_or(0);
    let y2 = run.iter().map(|w| w.bbox.y + w.bbox.height).max().unwrap_or(0);
    OcrWord {
        text: run.iter().map(|w| w.text.as_str()).collect::<Vec<_>>().join(" "),
        confidence: run.iter().map(|w| w.confidence).fold(f64::INFINITY, f64::min),
        bbox: BoundingBox::from_corners(x1, y1, x2, y2),
    }
}

pub struct TesseractOcr {
    command: String,
    lang: String,
    min_confidence: f64,
}

impl TesseractOcr {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            command: config.command.clone(),
            lang: config.lang.clone(),
            min_confidence: config.min_confidence,
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn analyze(&self, shot: &Screenshot) -> PinpointResult<Vec<OcrWord>> {
        let png = shot.png_bytes()?;

        let mut child = tokio::process::Command::new(&self.command)
            .args(["stdin", "stdout", "-l", &self.lang, "--psm", "3", "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    PinpointError::BackendUnavailable(format!("{} not installed", self.command))
                }
                _ => PinpointError::Ocr(format!("spawn {}: {e}", self.command)),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&png).await?;
        }
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(PinpointError::Ocr(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let words = parse_tsv(&String::from_utf8_lossy(&output.stdout), self.min_confidence);
        tracing::debug!(count = words.len(), "OCR words recognised");
        Ok(words)
    }
}

/// Parses tesseract TSV, keeping word rows (level 5) with text and enough confidence.
pub fn parse_tsv(tsv: &str, min_confidence: f64) -> Vec<OcrWord> {
    tsv.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split('\t').collect();
            if cols.len() < 12 || cols[0] != "5" {
                return None;
            }
            let text = cols[11].trim();
            let confidence: f64 = cols[10].trim().parse().ok()?;
            if text.is_empty() || confidence < min_confidence.max(0.0) {
                return None;
            }
            let num = |i: usize| cols[i].trim().parse::<i32>().ok();
            Some(OcrWord {
                text: text.to_string(),
                confidence,
                bbox: BoundingBox::new(num(6)?, num(7)?, num(8)?, num(9)?),
            })
        })
        .collect()
}
