//! Subtitle layout: greedy word-wrap for the banner strip and
//! image-to-overlay mapping for inplace fragments. Pure geometry; text
//! measurement is injected so the renderer's font metrics drive it.

use crate::ocr::BoundingBox;

/// Greedy word-wrap: words accumulate onto a line while the measured
/// width of `line + " " + word` stays within `available_width`. A word
/// wider than the whole width gets a line of its own.
pub fn wrap_lines(text: &str, available_width: f32, measure: &dyn Fn(&str) -> f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut line = String::new();

    for word in text.split_whitespace() {
        if line.is_empty() {
            line.push_str(word);
            continue;
        }
        let candidate = format!("{line} {word}");
        if measure(&candidate) <= available_width {
            line = candidate;
        } else {
            lines.push(std::mem::take(&mut line));
            line.push_str(word);
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

/// Wrapped banner block: lines, bounding box and the horizontal offset
/// that centers the block when it is narrower than the overlay.
#[derive(Clone, Debug, PartialEq)]
pub struct BannerPlan {
    pub lines: Vec<String>,
    pub block_width: f32,
    /// Text height plus one extra line height for the background strip.
    pub block_height: f32,
    pub x_offset: f32,
}

pub fn banner_plan(
    text: &str,
    available_width: f32,
    line_height: f32,
    measure: &dyn Fn(&str) -> f32,
) -> BannerPlan {
    let lines = wrap_lines(text, available_width, measure);
    let block_width = lines
        .iter()
        .map(|l| measure(l))
        .fold(0.0f32, |acc, w| acc.max(w));
    let block_height = (lines.len() as f32 + 1.0) * line_height;
    let x_offset = if block_width < available_width {
        (available_width - block_width) / 2.0
    } else {
        0.0
    };
    BannerPlan {
        lines,
        block_width,
        block_height,
        x_offset,
    }
}

/// Scales a detected region from captured-image pixels into overlay
/// coordinates. The overlay covers the captured window, so this also
/// absorbs any capture scale factor (e.g. HiDPI frames).
pub fn map_region(
    bounding_box: BoundingBox,
    image_size: (u32, u32),
    overlay_size: (f32, f32),
) -> BoundingBox {
    let (img_w, img_h) = image_size;
    if img_w == 0 || img_h == 0 {
        return BoundingBox::default();
    }
    let sx = overlay_size.0 / img_w as f32;
    let sy = overlay_size.1 / img_h as f32;
    BoundingBox {
        min_x: bounding_box.min_x * sx,
        min_y: bounding_box.min_y * sy,
        max_x: bounding_box.max_x * sx,
        max_y: bounding_box.max_y * sy,
    }
}
