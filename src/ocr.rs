//! Text recognition: the hierarchical recognition result, the confidence
//! filter that turns it into a string, and the cloud OCR client.

use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use image::RgbaImage;
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;

// --- RECOGNITION RESULT MODEL ---

/// Axis-aligned box in captured-image pixel coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingBox {
    pub min_x: f32,
    pub min_y: f32,
    pub max_x: f32,
    pub max_y: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f32 {
        self.max_y - self.min_y
    }
}

/// Atomic text unit. Symbols already carry any whitespace or punctuation
/// the recognizer attributes to them, so concatenation needs no separator.
#[derive(Clone, Debug)]
pub struct Symbol {
    pub text: String,
}

#[derive(Clone, Debug)]
pub struct Word {
    pub confidence: f32,
    pub symbols: Vec<Symbol>,
}

#[derive(Clone, Debug)]
pub struct Paragraph {
    pub words: Vec<Word>,
}

#[derive(Clone, Debug)]
pub struct Block {
    pub paragraphs: Vec<Paragraph>,
    pub bounding_box: BoundingBox,
}

/// One recognition call's output. Immutable after creation, discarded
/// after filtering.
#[derive(Clone, Debug, Default)]
pub struct RecognitionResult {
    pub blocks: Vec<Block>,
}

/// A block-level text region surviving the confidence filter, used for
/// inplace-mode placement.
#[derive(Clone, Debug, PartialEq)]
pub struct TextRegion {
    pub text: String,
    pub bounding_box: BoundingBox,
}

// --- RECOGNITION FILTER ---

/// Concatenates the symbols of every word whose confidence passes the
/// threshold, in document order. Returns an empty string when nothing
/// passes.
pub fn filter_by_confidence(result: &RecognitionResult, threshold: f32) -> String {
    assert!(
        (0.0..=1.0).contains(&threshold),
        "confidence threshold {} outside [0.0, 1.0]",
        threshold
    );

    let mut text = String::new();
    for block in &result.blocks {
        for paragraph in &block.paragraphs {
            for word in &paragraph.words {
                if word.confidence < threshold {
                    continue;
                }
                for symbol in &word.symbols {
                    text.push_str(&symbol.text);
                }
            }
        }
    }
    text
}

/// Block-level variant of the confidence filter: one region per block that
/// still has text after filtering, keeping the block's bounding box.
pub fn collect_regions(result: &RecognitionResult, threshold: f32) -> Vec<TextRegion> {
    assert!(
        (0.0..=1.0).contains(&threshold),
        "confidence threshold {} outside [0.0, 1.0]",
        threshold
    );

    let mut regions = Vec::new();
    for block in &result.blocks {
        let mut text = String::new();
        for paragraph in &block.paragraphs {
            for word in &paragraph.words {
                if word.confidence < threshold {
                    continue;
                }
                for symbol in &word.symbols {
                    text.push_str(&symbol.text);
                }
            }
        }
        if !text.is_empty() {
            regions.push(TextRegion {
                text,
                bounding_box: block.bounding_box,
            });
        }
    }
    regions
}

// --- RECOGNIZER COLLABORATOR ---

pub trait Recognizer: Send {
    fn recognize(&self, image: &RgbaImage) -> Result<RecognitionResult>;
}

const VISION_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

/// Google Vision document-text-detection client. Returns the full
/// page/block/paragraph/word/symbol hierarchy with per-word confidences.
pub struct VisionRecognizer {
    agent: ureq::Agent,
    api_key: String,
}

impl VisionRecognizer {
    pub fn new(api_key: String) -> Result<Self> {
        if api_key.trim().is_empty() {
            return Err(anyhow!("vision API key is empty"));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(15))
            .build();
        Ok(Self { agent, api_key })
    }
}

impl Recognizer for VisionRecognizer {
    fn recognize(&self, image: &RgbaImage) -> Result<RecognitionResult> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .context("encoding capture to PNG")?;
        let content = general_purpose::STANDARD.encode(&png);

        let payload = serde_json::json!({
            "requests": [{
                "image": { "content": content },
                "features": [{ "type": "DOCUMENT_TEXT_DETECTION" }]
            }]
        });

        let url = format!("{}?key={}", VISION_ENDPOINT, self.api_key);
        let response: AnnotateResponse = self
            .agent
            .post(&url)
            .send_json(payload)
            .context("vision request failed")?
            .into_json()
            .context("vision response was not valid JSON")?;

        let annotation = response
            .responses
            .into_iter()
            .next()
            .and_then(|r| r.full_text_annotation);

        Ok(match annotation {
            Some(a) => a.into_result(),
            None => RecognitionResult::default(),
        })
    }
}

// --- VISION WIRE FORMAT ---

#[derive(Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateItem {
    #[serde(default)]
    full_text_annotation: Option<WireAnnotation>,
}

#[derive(Deserialize)]
struct WireAnnotation {
    #[serde(default)]
    pages: Vec<WirePage>,
}

#[derive(Deserialize)]
struct WirePage {
    #[serde(default)]
    blocks: Vec<WireBlock>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBlock {
    #[serde(default)]
    paragraphs: Vec<WireParagraph>,
    #[serde(default)]
    bounding_box: Option<WirePoly>,
}

#[derive(Deserialize)]
struct WireParagraph {
    #[serde(default)]
    words: Vec<WireWord>,
}

#[derive(Deserialize)]
struct WireWord {
    #[serde(default)]
    confidence: f32,
    #[serde(default)]
    symbols: Vec<WireSymbol>,
}

#[derive(Deserialize)]
struct WireSymbol {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct WirePoly {
    #[serde(default)]
    vertices: Vec<WireVertex>,
}

#[derive(Deserialize, Default)]
struct WireVertex {
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
}

impl WirePoly {
    fn to_box(&self) -> BoundingBox {
        let mut b = BoundingBox {
            min_x: f32::MAX,
            min_y: f32::MAX,
            max_x: f32::MIN,
            max_y: f32::MIN,
        };
        for v in &self.vertices {
            b.min_x = b.min_x.min(v.x);
            b.min_y = b.min_y.min(v.y);
            b.max_x = b.max_x.max(v.x);
            b.max_y = b.max_y.max(v.y);
        }
        if self.vertices.is_empty() {
            BoundingBox::default()
        } else {
            b
        }
    }
}

impl WireAnnotation {
    fn into_result(self) -> RecognitionResult {
        let mut blocks = Vec::new();
        for page in self.pages {
            for block in page.blocks {
                let bounding_box = block
                    .bounding_box
                    .as_ref()
                    .map(WirePoly::to_box)
                    .unwrap_or_default();
                let paragraphs = block
                    .paragraphs
                    .into_iter()
                    .map(|p| Paragraph {
                        words: p
                            .words
                            .into_iter()
                            .map(|w| Word {
                                confidence: w.confidence,
                                symbols: w
                                    .symbols
                                    .into_iter()
                                    .map(|s| Symbol { text: s.text })
                                    .collect(),
                            })
                            .collect(),
                    })
                    .collect();
                blocks.push(Block {
                    paragraphs,
                    bounding_box,
                });
            }
        }
        RecognitionResult { blocks }
    }
}

// --- TESTS ---
