//! Window capture collaborator. The pipeline depends only on the
//! `Capture` trait; the Windows implementation grabs the target window
//! via GDI, other platforms can replay a still image for debugging.

use anyhow::{Context, Result};
use image::RgbaImage;
use std::path::PathBuf;

/// Screen-space rectangle in virtual-desktop coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

/// One captured frame plus the geometry needed to place the overlay on
/// the right display.
pub struct Frame {
    pub image: RgbaImage,
    /// Bounds of the captured window.
    pub window_bounds: Bounds,
    /// Bounds of the display containing the captured window.
    pub display_bounds: Bounds,
}

pub trait Capture: Send {
    /// Captures the first visible window whose title contains
    /// `title_substring` (case-insensitive).
    fn capture(&self, title_substring: &str) -> Result<Frame>;
}

/// Titles of all visible top-level windows, for `--list-windows`.
pub fn list_windows() -> Vec<String> {
    platform::list_windows()
}

pub fn platform_capture() -> Box<dyn Capture> {
    Box::new(platform::PlatformCapture)
}

// --- REPLAY CAPTURE ---

/// Serves a still image from disk on every call. Debugging aid and the
/// smoke path on platforms without native capture.
pub struct ReplayCapture {
    path: PathBuf,
}

impl ReplayCapture {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Capture for ReplayCapture {
    fn capture(&self, _title_substring: &str) -> Result<Frame> {
        let image = image::open(&self.path)
            .with_context(|| format!("loading replay image {}", self.path.display()))?
            .to_rgba8();
        let (w, h) = (image.width() as i32, image.height() as i32);
        Ok(Frame {
            image,
            window_bounds: Bounds {
                x: 0,
                y: 0,
                width: w,
                height: h,
            },
            display_bounds: Bounds {
                x: 0,
                y: 0,
                width: w.max(1920),
                height: h.max(1080),
            },
        })
    }
}

// --- WINDOWS (GDI) ---

#[cfg(windows)]
mod platform {
    use super::{Bounds, Capture, Frame};
    use anyhow::{anyhow, Context, Result};
    use windows::Win32::Foundation::{HWND, LPARAM, RECT};
    use windows::Win32::Graphics::Gdi::{
        BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC,
        GetDIBits, GetMonitorInfoW, MonitorFromWindow, ReleaseDC, SelectObject, BITMAPINFO,
        BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, MONITORINFO, MONITOR_DEFAULTTONEAREST, SRCCOPY,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetWindowRect, GetWindowTextW, IsWindowVisible,
    };

    pub struct PlatformCapture;

    impl Capture for PlatformCapture {
        fn capture(&self, title_substring: &str) -> Result<Frame> {
            let hwnd = find_window(title_substring)
                .ok_or_else(|| anyhow!("no visible window matching '{}'", title_substring))?;

            let mut rect = RECT::default();
            unsafe {
                GetWindowRect(hwnd, &mut rect).context("GetWindowRect failed")?;
            }
            let window_bounds = Bounds {
                x: rect.left,
                y: rect.top,
                width: rect.right - rect.left,
                height: rect.bottom - rect.top,
            };
            if window_bounds.width <= 0 || window_bounds.height <= 0 {
                return Err(anyhow!("window matching '{}' has no area", title_substring));
            }

            let image = unsafe { grab_screen_rect(&window_bounds)? };
            let display_bounds = display_bounds_for(hwnd);

            Ok(Frame {
                image,
                window_bounds,
                display_bounds,
            })
        }
    }

    fn display_bounds_for(hwnd: HWND) -> Bounds {
        unsafe {
            let monitor = MonitorFromWindow(hwnd, MONITOR_DEFAULTTONEAREST);
            let mut info = MONITORINFO {
                cbSize: std::mem::size_of::<MONITORINFO>() as u32,
                ..Default::default()
            };
            if GetMonitorInfoW(monitor, &mut info).as_bool() {
                let r = info.rcMonitor;
                Bounds {
                    x: r.left,
                    y: r.top,
                    width: r.right - r.left,
                    height: r.bottom - r.top,
                }
            } else {
                Bounds::default()
            }
        }
    }

    /// Blit a screen-space rectangle into an RGBA image.
    unsafe fn grab_screen_rect(bounds: &Bounds) -> Result<image::RgbaImage> {
        let (w, h) = (bounds.width, bounds.height);

        let hdc_screen = GetDC(None);
        let hdc_mem = CreateCompatibleDC(Some(hdc_screen));
        let hbm = CreateCompatibleBitmap(hdc_screen, w, h);
        let old_obj = SelectObject(hdc_mem, hbm.into());

        let blit = BitBlt(hdc_mem, 0, 0, w, h, Some(hdc_screen), bounds.x, bounds.y, SRCCOPY);

        let mut bmi = BITMAPINFO {
            bmiHeader: BITMAPINFOHEADER {
                biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                biWidth: w,
                biHeight: -h, // Top-down
                biPlanes: 1,
                biBitCount: 32,
                biCompression: BI_RGB.0 as u32,
                ..Default::default()
            },
            ..Default::default()
        };
        let mut buffer: Vec<u8> = vec![0; (w * h * 4) as usize];
        let lines = GetDIBits(
            hdc_mem,
            hbm,
            0,
            h as u32,
            Some(buffer.as_mut_ptr() as *mut _),
            &mut bmi,
            DIB_RGB_COLORS,
        );

        SelectObject(hdc_mem, old_obj);
        let _ = DeleteObject(hbm.into());
        let _ = DeleteDC(hdc_mem);
        ReleaseDC(None, hdc_screen);

        if blit.is_err() || lines == 0 {
            return Err(anyhow!("screen blit failed"));
        }

        // BGRA -> RGBA
        for chunk in buffer.chunks_exact_mut(4) {
            chunk.swap(0, 2);
            chunk[3] = 255;
        }

        image::RgbaImage::from_raw(w as u32, h as u32, buffer)
            .ok_or_else(|| anyhow!("captured buffer has unexpected size"))
    }

    fn find_window(title_substring: &str) -> Option<HWND> {
        let needle = title_substring.to_lowercase();
        enumerate_titled_windows()
            .into_iter()
            .find(|(_, title)| title.to_lowercase().contains(&needle))
            .map(|(hwnd, _)| hwnd)
    }

    pub fn list_windows() -> Vec<String> {
        enumerate_titled_windows()
            .into_iter()
            .map(|(_, title)| title)
            .collect()
    }

    fn enumerate_titled_windows() -> Vec<(HWND, String)> {
        let mut windows_found: Vec<(HWND, String)> = Vec::new();

        extern "system" fn enum_callback(hwnd: HWND, lparam: LPARAM) -> windows::core::BOOL {
            unsafe {
                if !IsWindowVisible(hwnd).as_bool() {
                    return windows::core::BOOL(1);
                }
                let mut title_buf = [0u16; 512];
                let len = GetWindowTextW(hwnd, &mut title_buf);
                if len == 0 {
                    return windows::core::BOOL(1);
                }
                let title = String::from_utf16_lossy(&title_buf[..len as usize]);
                let out = &mut *(lparam.0 as *mut Vec<(HWND, String)>);
                out.push((hwnd, title));
                windows::core::BOOL(1)
            }
        }

        unsafe {
            let _ = EnumWindows(
                Some(enum_callback),
                LPARAM(&mut windows_found as *mut _ as isize),
            );
        }
        windows_found
    }
}

// --- OTHER PLATFORMS ---

#[cfg(not(windows))]
mod platform {
    use super::{Capture, Frame};
    use anyhow::{anyhow, Result};

    pub struct PlatformCapture;

    impl Capture for PlatformCapture {
        fn capture(&self, _title_substring: &str) -> Result<Frame> {
            Err(anyhow!(
                "native window capture is not supported on this platform; use --replay"
            ))
        }
    }

    pub fn list_windows() -> Vec<String> {
        Vec::new()
    }
}
