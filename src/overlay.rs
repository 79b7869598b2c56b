//! Overlay state machine: the always-on-top subtitle window, its modes,
//! hotkey transitions, drag repositioning and per-tick rendering. The
//! render tick never blocks; it only reads the last published subtitle
//! and pokes the scheduler's due-check.

use crate::capture::Bounds;
use crate::config::{HotkeyBindings, Settings};
use crate::layout;
use crate::pipeline::{CycleKind, Scheduler, Subtitle, SubtitleSlot};
use eframe::egui;
use log::info;
use std::time::{Duration, Instant};

pub const MIN_FONT_SIZE: f32 = 8.0;
pub const MAX_FONT_SIZE: f32 = 96.0;
const FONT_STEP: f32 = 2.0;

/// Margin between the banner strip and the bottom edge of the display.
const BANNER_BOTTOM_MARGIN: f32 = 50.0;

/// Cadence of the render loop while idle; cycles are far slower.
const TICK_INTERVAL: Duration = Duration::from_millis(33);

// --- MODE STATE MACHINE ---

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Off,
    Banner,
    Inplace,
}

impl Mode {
    /// The "switch mode" hotkey cycles Off → Banner → Inplace → Off.
    pub fn cycled(self) -> Mode {
        match self {
            Mode::Off => Mode::Banner,
            Mode::Banner => Mode::Inplace,
            Mode::Inplace => Mode::Off,
        }
    }

    /// The "toggle overlay" hotkey flips between Off and the last
    /// non-Off mode.
    pub fn toggled(self, last_active: Mode) -> Mode {
        if self == Mode::Off {
            last_active
        } else {
            Mode::Off
        }
    }

    pub fn cycle_kind(self) -> Option<CycleKind> {
        match self {
            Mode::Off => None,
            Mode::Banner => Some(CycleKind::Banner),
            Mode::Inplace => Some(CycleKind::Inplace),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Mode::Off => "off",
            Mode::Banner => "banner",
            Mode::Inplace => "inplace",
        }
    }
}

/// Banner strip geometry on the display containing the captured window:
/// full width, bottom fifth, lifted off the bottom edge.
pub fn banner_viewport(display: Bounds) -> (egui::Pos2, egui::Vec2) {
    let height = (display.height as f32 / 5.0).max(MIN_FONT_SIZE * 3.0);
    let y = display.y as f32 + display.height as f32 - height - BANNER_BOTTOM_MARGIN;
    (
        egui::pos2(display.x as f32, y),
        egui::vec2(display.width as f32, height),
    )
}

/// Inplace mode covers the captured window exactly.
pub fn inplace_viewport(window: Bounds) -> (egui::Pos2, egui::Vec2) {
    (
        egui::pos2(window.x as f32, window.y as f32),
        egui::vec2(window.width as f32, window.height as f32),
    )
}

pub fn clamp_font_size(size: f32) -> f32 {
    size.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE)
}

/// Wraps banner text against the real font metrics of this frame. Text
/// layout mutates the font atlas, so both reads go through `fonts_mut`.
fn banner_layout(ui: &egui::Ui, text: &str, font_size: f32) -> (egui::FontId, f32, layout::BannerPlan) {
    let font = egui::FontId::proportional(font_size);
    let line_height = ui.fonts_mut(|f| f.row_height(&font));
    let measure = |s: &str| {
        ui.fonts_mut(|f| {
            f.layout_no_wrap(s.to_owned(), font.clone(), egui::Color32::WHITE)
                .rect
                .width()
        })
    };
    let plan = layout::banner_plan(text, ui.available_width(), line_height, &measure);
    (font, line_height, plan)
}

// --- OVERLAY APP ---

pub struct OverlayApp {
    mode: Mode,
    last_active_mode: Mode,
    font_size: f32,
    font_color: egui::Color32,
    background_color: egui::Color32,
    hotkeys: HotkeyBindings,
    scheduler: Scheduler,
    slot: SubtitleSlot,
    /// Display the overlay was last placed on; a change means the
    /// captured window moved to another monitor.
    placed_display: Option<Bounds>,
    /// Captured-window bounds the inplace overlay last covered.
    placed_window: Option<Bounds>,
    reposition_pending: bool,
}

impl OverlayApp {
    pub fn new(settings: &Settings, scheduler: Scheduler) -> Self {
        let slot = scheduler.slot();
        let last_active_mode = match settings.mode {
            Mode::Off => Mode::Banner,
            other => other,
        };
        Self {
            mode: settings.mode,
            last_active_mode,
            font_size: clamp_font_size(settings.font_size),
            font_color: settings.font_color,
            background_color: settings.background_color,
            hotkeys: settings.hotkeys.clone(),
            scheduler,
            slot,
            placed_display: None,
            placed_window: None,
            reposition_pending: true,
        }
    }

    fn set_mode(&mut self, mode: Mode) {
        if mode != Mode::Off {
            self.last_active_mode = mode;
        }
        if mode != self.mode {
            self.mode = mode;
            self.reposition_pending = true;
            info!("[mode] {}", self.mode.label());
        }
    }

    fn handle_hotkeys(&mut self, ctx: &egui::Context) -> bool {
        let hk = self.hotkeys.clone();
        let (switch, toggle, grow, shrink, quit) = ctx.input(|i| {
            (
                i.key_pressed(hk.switch_mode),
                i.key_pressed(hk.toggle_overlay),
                i.key_pressed(hk.font_increase),
                i.key_pressed(hk.font_decrease),
                i.key_pressed(hk.quit),
            )
        });

        if switch {
            self.set_mode(self.mode.cycled());
        }
        if toggle {
            self.set_mode(self.mode.toggled(self.last_active_mode));
        }
        if grow {
            self.font_size = clamp_font_size(self.font_size + FONT_STEP);
            info!("[font] size {}", self.font_size);
        }
        if shrink {
            self.font_size = clamp_font_size(self.font_size - FONT_STEP);
            info!("[font] size {}", self.font_size);
        }
        quit
    }

    /// Moves the window onto the display containing the captured window
    /// (banner) or over the captured window itself (inplace). Runs on
    /// mode entry and whenever the capture target's geometry changes, so
    /// a user drag is otherwise left alone.
    fn follow_captured_window(&mut self, ctx: &egui::Context, subtitle: &Subtitle) {
        let Some(placement) = subtitle.placement else {
            return;
        };

        let (pos, size) = match self.mode {
            Mode::Off => return,
            Mode::Banner => {
                let moved = self.placed_display != Some(placement.display_bounds);
                if !moved && !self.reposition_pending {
                    return;
                }
                banner_viewport(placement.display_bounds)
            }
            Mode::Inplace => {
                let moved = self.placed_window != Some(placement.window_bounds);
                if !moved && !self.reposition_pending {
                    return;
                }
                inplace_viewport(placement.window_bounds)
            }
        };

        self.placed_display = Some(placement.display_bounds);
        self.placed_window = Some(placement.window_bounds);
        self.reposition_pending = false;
        ctx.send_viewport_cmd(egui::ViewportCommand::OuterPosition(pos));
        ctx.send_viewport_cmd(egui::ViewportCommand::InnerSize(size));
    }

    /// Banner mode: holding the primary button drags the strip by the
    /// pointer's frame-to-frame delta.
    fn handle_drag(&mut self, ctx: &egui::Context) {
        if self.mode != Mode::Banner {
            return;
        }
        let (down, delta, outer) = ctx.input(|i| {
            (
                i.pointer.primary_down(),
                i.pointer.delta(),
                i.viewport().outer_rect,
            )
        });
        if !down || delta == egui::Vec2::ZERO {
            return;
        }
        if let Some(outer) = outer {
            ctx.send_viewport_cmd(egui::ViewportCommand::OuterPosition(outer.min + delta));
        }
    }

    fn draw_banner(&self, ui: &egui::Ui, subtitle: &Subtitle) {
        if subtitle.text.is_empty() {
            return;
        }
        let (font, line_height, plan) = banner_layout(ui, &subtitle.text, self.font_size);
        let painter = ui.painter();

        // Background strip first, text on top.
        let background = egui::Rect::from_min_size(
            egui::pos2(plan.x_offset, 0.0),
            egui::vec2(plan.block_width, plan.block_height),
        );
        painter.rect_filled(background, 4.0, self.background_color);
        for (i, line) in plan.lines.iter().enumerate() {
            painter.text(
                egui::pos2(plan.x_offset, (i as f32 + 0.5) * line_height),
                egui::Align2::LEFT_TOP,
                line,
                font.clone(),
                self.font_color,
            );
        }
    }

    fn draw_inplace(&self, ui: &egui::Ui, subtitle: &Subtitle) {
        let Some(placement) = subtitle.placement else {
            return;
        };
        let overlay_size = ui.available_size();
        let painter = ui.painter();

        for fragment in &subtitle.fragments {
            let b = layout::map_region(
                fragment.bounding_box,
                placement.image_size,
                (overlay_size.x, overlay_size.y),
            );
            let rect =
                egui::Rect::from_min_max(egui::pos2(b.min_x, b.min_y), egui::pos2(b.max_x, b.max_y));
            if rect.width() <= 0.0 || rect.height() <= 0.0 {
                continue;
            }
            // Each fragment occupies its source region's geometry; the
            // font is sized to the region, not re-wrapped.
            let font = egui::FontId::proportional(clamp_font_size(rect.height() * 0.8));
            painter.rect_filled(rect, 2.0, self.background_color);
            painter.text(
                rect.left_top(),
                egui::Align2::LEFT_TOP,
                &fragment.text,
                font,
                self.font_color,
            );
        }
    }
}

impl eframe::App for OverlayApp {
    fn clear_color(&self, _visuals: &egui::Visuals) -> [f32; 4] {
        egui::Rgba::TRANSPARENT.to_array()
    }

    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if self.handle_hotkeys(ctx) {
            info!("[quit] exiting");
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
            return;
        }

        // Kick the pipeline's due-check; never blocks.
        if let Some(kind) = self.mode.cycle_kind() {
            self.scheduler.tick(Instant::now(), kind);
        }

        let (subtitle, _generation) = self.slot.snapshot();
        self.follow_captured_window(ctx, &subtitle);
        self.handle_drag(ctx);

        egui::CentralPanel::default()
            .frame(egui::Frame::NONE)
            .show(ctx, |ui| match self.mode {
                Mode::Off => {}
                Mode::Banner => self.draw_banner(ui, &subtitle),
                Mode::Inplace => self.draw_inplace(ui, &subtitle),
            });

        ctx.request_repaint_after(TICK_INTERVAL);
    }
}
