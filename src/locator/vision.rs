//! Vision-model localisation: prompt construction and reply parsing.
//!
//! The reply's coordinates are resolved through a ladder: a pixel bounding box, then a
//! normalised (0–1) bounding box, then a percentage position. A box is normalised only
//! when the reply says so (`"box_normalized"`, or `"coordinates": "normalized"`), never
//! because its values happen to be small.
use serde_json::Value;

use crate::perception::types::BoundingBox;
use crate::strategy::{first_ok, rung, LadderTrace, Step};

pub fn build_location_prompt(description: &str, width: u32, height: u32) -> String {
    format!(
        r#"Analyze this {width}x{height} screenshot to locate: "{description}"

Reply with JSON only:
{{
    "found": true or false,
    "box": [x1, y1, x2, y2],
    "confidence": 0.0-1.0,
    "position": {{ "x_percent": 0-100, "y_percent": 0-100 }}
}}

"box" is the element's bounding box in screenshot pixels, origin top-left.
If you can only give fractions of the width and height, send them as "box_normalized": [x1, y1, x2, y2] with values 0-1 instead of "box".
"position" is the element's centre as a percentage of width and height, used when you cannot give a box.
If the element is not visible, set "found" to false."#
    )
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisionHit {
    pub center: (i32, i32),
    pub bbox: Option<BoundingBox>,
    /// Always 0–1.
    pub confidence: f64,
    /// Ladder rung that produced the coordinates.
    pub source: &'static str,
}

/// JSON object inside a reply that may be wrapped in code fences or prose.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn numbers(value: &Value) -> Option<Vec<f64>> {
    value.as_array()?.iter().map(Value::as_f64).collect()
}

fn declares_normalized(reply: &Value) -> bool {
    reply
        .get("coordinates")
        .and_then(Value::as_str)
        .is_some_and(|c| c.trim().to_ascii_lowercase().starts_with("normali"))
}

fn pixel_box(reply: &Value, width: u32, height: u32) -> Step<(BoundingBox, (i32, i32))> {
    if declares_normalized(reply) {
        return Step::skip("box is declared normalised");
    }
    let Some(b) = reply.get("box").and_then(numbers) else {
        return Step::skip("no box");
    };
    if b.len() != 4 {
        return Step::fail(format!("box has {} values", b.len()));
    }
    let (w, h) = (width as f64, height as f64);
    if b.iter().any(|v| *v < 0.0) || b[0].max(b[2]) > w || b[1].max(b[3]) > h {
        return Step::fail("box outside the screenshot");
    }
    let bbox = BoundingBox::from_corners(b[0] as i32, b[1] as i32, b[2] as i32, b[3] as i32);
    Step::Ok((bbox, bbox.center()))
}

fn normalized_box(reply: &Value, width: u32, height: u32) -> Step<(BoundingBox, (i32, i32))> {
    let declared = match reply.get("box_normalized") {
        Some(b) => Some(b),
        None if declares_normalized(reply) => reply.get("box"),
        None => None,
    };
    let Some(b) = declared.and_then(numbers) else {
        return Step::skip("no normalised box");
    };
    if b.len() != 4 {
        return Step::fail(format!("normalised box has {} values", b.len()));
    }
    if !b.iter().all(|v| (0.0..=1.0).contains(v)) {
        return Step::fail("normalised box outside 0-1");
    }
    let (w, h) = (width as f64, height as f64);
    let bbox = BoundingBox::from_corners(
        (b[0] * w).round() as i32,
        (b[1] * h).round() as i32,
        (b[2] * w).round() as i32,
        (b[3] * h).round() as i32,
    );
    Step::Ok((bbox, bbox.center()))
}

fn position_percent(reply: &Value, width: u32, height: u32) -> Step<(i32, i32)> {
    let Some(pos) = reply.get("position") else {
        return Step::skip("no position");
    };
    let (Some(xp), Some(yp)) = (
        pos.get("x_percent").and_then(Value::as_f64),
        pos.get("y_percent").and_then(Value::as_f64),
    ) else {
        return Step::fail("position lacks x_percent/y_percent");
    };
    if !(0.0..=100.0).contains(&xp) || !(0.0..=100.0).contains(&yp) {
        return Step::fail("position outside 0-100");
    }
    Step::Ok((
        (xp / 100.0 * width as f64).round() as i32,
        (yp / 100.0 * height as f64).round() as i32,
    ))
}

/// Model confidence mapped to 0–1; values above 1 are read as percentages.
pub fn normalize_confidence(raw: f64) -> f64 {
    if raw > 1.0 {
        (raw / 100.0).min(1.0)
    } else {
        raw.max(0.0)
    }
}

/// Parses a vision reply. `Err` carries the reason the reply yields no location.
pub fn parse_vision_reply(
    text: &str,
    width: u32,
    height: u32,
    default_confidence: f64,
) -> Result<VisionHit, String> {
    let json = extract_json(text).ok_or_else(|| "reply contains no JSON object".to_string())?;
    let reply: Value = serde_json::from_str(json).map_err(|e| format!("invalid JSON: {e}"))?;

    if !reply.get("found").and_then(Value::as_bool).unwrap_or(true) {
        let reason = reply
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("model reports the target is not visible");
        return Err(reason.to_string());
    }

    let confidence = reply
        .get("confidence")
        .and_then(Value::as_f64)
        .map(normalize_confidence)
        .unwrap_or(default_confidence);

    let mut trace = LadderTrace::new();
    let hit = first_ok(
        &mut trace,
        vec![
            rung("pixel_box", || {
                pixel_box(&reply, width, height).map(|(bbox, center)| VisionHit {
                    center,
                    bbox: Some(bbox),
                    confidence,
                    source: "pixel_box",
                })
            }),
            rung("normalized_box", || {
                normalized_box(&reply, width, height).map(|(bbox, center)| VisionHit {
                    center,
                    bbox: Some(bbox),
                    confidence,
                    source: "normalized_box",
                })
            }),
            rung("position_percent", || {
                position_percent(&reply, width, height).map(|center| VisionHit {
                    center,
                    bbox: None,
                    confidence,
                    source: "position_percent",
                })
            }),
        ],
    );
    hit.ok_or_else(|| format!("no usable coordinates ({})", trace.summary()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_box_in_code_fence() {
        let reply = "Sure!\n```json\n{\"found\": true, \"box\": [100, 200, 140, 220], \"confidence\": 0.9}\n```";
        let hit = parse_vision_reply(reply, 1920, 1080, 0.8).unwrap();
        assert_eq!(hit.center, (120, 210));
        assert_eq!(hit.source, "pixel_box");
        assert!((hit.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn normalised_box_is_scaled() {
        let hit = parse_vision_reply(r#"{"found": true, "box_normalized": [0.5, 0.5, 0.6, 0.7]}"#, 1000, 500, 0.8)
            .unwrap();
        assert_eq!(hit.source, "normalized_box");
        assert_eq!(hit.center, (550, 300));
        assert!((hit.confidence - 0.8).abs() < 1e-9);

        let declared = r#"{"found": true, "coordinates": "normalized", "box": [0.5, 0.5, 0.6, 0.7]}"#;
        let hit = parse_vision_reply(declared, 1000, 500, 0.8).unwrap();
        assert_eq!(hit.source, "normalized_box");
        assert_eq!(hit.center, (550, 300));
    }

    #[test]
    fn small_pixel_box_stays_in_pixels() {
        let hit = parse_vision_reply(r#"{"found": true, "box": [0, 0, 1, 1]}"#, 1000, 500, 0.8).unwrap();
        assert_eq!(hit.source, "pixel_box");
        assert_eq!(hit.center, (0, 0));
    }

    #[test]
    fn out_of_range_normalised_box_falls_back_to_position() {
        let reply = r#"{"found": true, "box_normalized": [50, 50, 60, 70],
                        "position": {"x_percent": 10, "y_percent": 10}}"#;
        let hit = parse_vision_reply(reply, 1000, 500, 0.8).unwrap();
        assert_eq!(hit.source, "position_percent");
        assert_eq!(hit.center, (100, 50));
    }

    #[test]
    fn out_of_bounds_box_falls_back_to_position() {
        let reply = r#"{"found": true, "box": [5000, 10, 5100, 40],
                        "position": {"x_percent": 25, "y_percent": 50}, "confidence": 85}"#;
        let hit = parse_vision_reply(reply, 800, 600, 0.8).unwrap();
        assert_eq!(hit.source, "position_percent");
        assert_eq!(hit.center, (200, 300));
        assert!(hit.bbox.is_none());
        assert!((hit.confidence - 0.85).abs() < 1e-9);
    }

    #[test]
    fn not_found_and_garbage_are_errors() {
        let err = parse_vision_reply(r#"{"found": false}"#, 800, 600, 0.8).unwrap_err();
        assert!(err.contains("not visible"));
        assert!(parse_vision_reply("I cannot see it", 800, 600, 0.8).is_err());
        let err = parse_vision_reply(r#"{"found": true}"#, 800, 600, 0.8).unwrap_err();
        assert!(err.contains("pixel_box: skipped (no box)"));
    }

    #[test]
    fn confidence_normalisation() {
        assert_eq!(normalize_confidence(0.4), 0.4);
        assert_eq!(normalize_confidence(70.0), 0.7);
        assert_eq!(normalize_confidence(250.0), 1.0);
        assert_eq!(normalize_confidence(-1.0), 0.0);
    }
}
