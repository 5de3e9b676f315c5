//! Image Engine - fixed-size pass assets
//!
//! Every image the pass needs is derived here: icons are resampled in two
//! stages and masked to a squircle, logos are letterboxed into the standard
//! canvas and strips are cover-fitted. Loading never fails loudly; a missing
//! or broken source is an [`ImageLoad::Unavailable`] that the fallback chain
//! resolves.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgba, RgbaImage};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::StyleConfig;

pub const SQUIRCLE_EXPONENT: f64 = 3.8;
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
pub const PLACEHOLDER_COLOR: Rgba<u8> = Rgba([40, 40, 40, 255]);

pub const ICON_SIZE: u32 = 29;
pub const ICON_SIZE_2X: u32 = 58;
pub const LOGO_CANVAS: (u32, u32) = (160, 50);
pub const LOGO_CANVAS_2X: (u32, u32) = (320, 100);
pub const LOGO_MAX_2X: (u32, u32) = (300, 85);
pub const STRIP_SIZE: (u32, u32) = (375, 123);
pub const STRIP_SIZE_2X: (u32, u32) = (1125, 369);

pub const ICON_FILE: &str = "icon.png";
pub const ICON_2X_FILE: &str = "icon@2x.png";
pub const LOGO_FILE: &str = "logo.png";
pub const LOGO_2X_FILE: &str = "logo@2x.png";
pub const STRIP_FILE: &str = "strip.png";
pub const STRIP_2X_FILE: &str = "strip@2x.png";

const FILTER: FilterType = FilterType::Lanczos3;
const SHARPEN_RADIUS: f32 = 0.5;
const SHARPEN_AMOUNT: f32 = 0.8;
const SHARPEN_THRESHOLD: i32 = 1;

/// Why an image could not be obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnavailableReason {
    NotConfigured,
    NotFound(PathBuf),
    Fetch(String),
    Decode(String),
    Rasterize(String),
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::NotConfigured => write!(f, "no source configured"),
            UnavailableReason::NotFound(path) => write!(f, "file not found: {}", path.display()),
            UnavailableReason::Fetch(e) => write!(f, "download failed: {}", e),
            UnavailableReason::Decode(e) => write!(f, "cannot decode image: {}", e),
            UnavailableReason::Rasterize(e) => write!(f, "cannot rasterize SVG: {}", e),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ImageLoad {
    Loaded(DynamicImage),
    Unavailable(UnavailableReason),
}

impl ImageLoad {
    pub fn is_loaded(&self) -> bool {
        matches!(self, ImageLoad::Loaded(_))
    }

    pub fn into_image(self) -> Option<DynamicImage> {
        match self {
            ImageLoad::Loaded(img) => Some(img),
            ImageLoad::Unavailable(_) => None,
        }
    }
}

/// Resolve a load result against an ordered list of fallback files.
///
/// The first candidate that loads wins. When none does, the original reason
/// is kept.
pub fn with_fallbacks<L>(primary: ImageLoad, candidates: &[PathBuf], load: L) -> ImageLoad
where
    L: Fn(&Path) -> ImageLoad,
{
    let reason = match primary {
        ImageLoad::Loaded(img) => return ImageLoad::Loaded(img),
        ImageLoad::Unavailable(reason) => reason,
    };
    for candidate in candidates {
        match load(candidate) {
            ImageLoad::Loaded(img) => {
                debug!(fallback = %candidate.display(), %reason, "using fallback image");
                return ImageLoad::Loaded(img);
            }
            ImageLoad::Unavailable(r) => {
                debug!(candidate = %candidate.display(), reason = %r, "fallback skipped")
            }
        }
    }
    ImageLoad::Unavailable(reason)
}

/// Loads images from URLs or local paths.
pub struct ImageLoader {
    client: Option<reqwest::blocking::Client>,
}

impl ImageLoader {
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| warn!(error = %e, "HTTP client unavailable, remote images disabled"))
            .ok();
        Self { client }
    }

    /// A loader that never touches the network; remote sources are unavailable.
    pub fn offline() -> Self {
        Self { client: None }
    }

    pub fn load(&self, source: Option<&str>) -> ImageLoad {
        let Some(source) = source.map(str::trim).filter(|s| !s.is_empty()) else {
            return ImageLoad::Unavailable(UnavailableReason::NotConfigured);
        };
        if source.starts_with("http://") || source.starts_with("https://") {
            self.load_remote(source)
        } else {
            self.load_path(Path::new(source))
        }
    }

    pub fn load_path(&self, path: &Path) -> ImageLoad {
        if !path.is_file() {
            return ImageLoad::Unavailable(UnavailableReason::NotFound(path.to_path_buf()));
        }
        match fs::read(path) {
            Ok(data) => decode_image(&data, has_svg_extension(&path.to_string_lossy())),
            Err(e) => ImageLoad::Unavailable(UnavailableReason::Decode(e.to_string())),
        }
    }

    fn load_remote(&self, url: &str) -> ImageLoad {
        match self.fetch(url) {
            Ok(data) => decode_image(&data, has_svg_extension(url)),
            Err(reason) => {
                warn!(%url, %reason, "remote image unavailable");
                ImageLoad::Unavailable(reason)
            }
        }
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, UnavailableReason> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| UnavailableReason::Fetch("HTTP client unavailable".to_string()))?;
        let response = client
            .get(url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| UnavailableReason::Fetch(e.to_string()))?;
        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| UnavailableReason::Fetch(e.to_string()))
    }
}

impl Default for ImageLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn has_svg_extension(source: &str) -> bool {
    source.to_ascii_lowercase().ends_with(".svg")
}

fn looks_like_svg(data: &[u8]) -> bool {
    data.windows(4).any(|w| w == b"<svg")
}

/// Decode raster bytes, rasterizing SVG content first.
pub fn decode_image(data: &[u8], svg_hint: bool) -> ImageLoad {
    if svg_hint || looks_like_svg(data) {
        return match rasterize_svg(data) {
            Ok(img) => ImageLoad::Loaded(img),
            Err(reason) => ImageLoad::Unavailable(reason),
        };
    }
    match image::load_from_memory(data) {
        Ok(img) => ImageLoad::Loaded(DynamicImage::ImageRgba8(img.to_rgba8())),
        Err(e) => ImageLoad::Unavailable(UnavailableReason::Decode(e.to_string())),
    }
}

pub fn rasterize_svg(data: &[u8]) -> Result<DynamicImage, UnavailableReason> {
    use resvg::{tiny_skia, usvg};

    let tree = usvg::Tree::from_data(data, &usvg::Options::default())
        .map_err(|e| UnavailableReason::Rasterize(e.to_string()))?;
    let size = tree.size().to_int_size();
    let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height())
        .ok_or_else(|| UnavailableReason::Rasterize("empty canvas".to_string()))?;
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());
    let png = pixmap
        .encode_png()
        .map_err(|e| UnavailableReason::Rasterize(e.to_string()))?;
    image::load_from_memory(&png)
        .map(|img| DynamicImage::ImageRgba8(img.to_rgba8()))
        .map_err(|e| UnavailableReason::Decode(e.to_string()))
}

// --- Geometry ---

/// 4x when the source is small relative to the target, 2x otherwise.
pub fn upscale_factor(source: (u32, u32), target: u32) -> u32 {
    if source.0.max(source.1) < target * 2 {
        4
    } else {
        2
    }
}

/// Crop the source around its center to the target aspect ratio, then
/// resize the crop to exactly `width` x `height`.
pub fn cover_fit(img: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let (sw, sh) = img.dimensions();
    if sw == 0 || sh == 0 || width == 0 || height == 0 {
        return RgbaImage::new(width, height);
    }
    let (crop_w, crop_h) = if sw as u64 * height as u64 > sh as u64 * width as u64 {
        let w = (sh as f64 * width as f64 / height as f64).round() as u32;
        (w.clamp(1, sw), sh)
    } else {
        let h = (sw as f64 * height as f64 / width as f64).round() as u32;
        (sw, h.clamp(1, sh))
    };
    let left = (sw - crop_w) / 2;
    let top = (sh - crop_h) / 2;
    let cropped = imageops::crop_imm(img, left, top, crop_w, crop_h).to_image();
    imageops::resize(&cropped, width, height, FILTER)
}

/// Largest size with the same aspect ratio that fits inside the bounds.
/// Images that already fit are left alone.
pub fn fit_within(size: (u32, u32), bounds: (u32, u32)) -> (u32, u32) {
    let (w, h) = size;
    if w <= bounds.0 && h <= bounds.1 {
        return size;
    }
    let scale = f64::min(bounds.0 as f64 / w as f64, bounds.1 as f64 / h as f64);
    let fit_w = ((w as f64 * scale).round() as u32).clamp(1, bounds.0);
    let fit_h = ((h as f64 * scale).round() as u32).clamp(1, bounds.1);
    (fit_w, fit_h)
}

/// Square asset of exactly `target` pixels per side.
///
/// The source is first cover-fitted to an intermediate square 2x or 4x the
/// target, then brought down to the target with the same filter. The optional
/// unsharp pass recovers the edge softness of the double resample.
pub fn produce_fixed_asset(source: &DynamicImage, target: u32, sharpen: bool) -> RgbaImage {
    if target == 0 {
        return RgbaImage::new(0, 0);
    }
    let rgba = source.to_rgba8();
    let intermediate = target * upscale_factor(rgba.dimensions(), target);
    let high = cover_fit(&rgba, intermediate, intermediate);
    let out = imageops::resize(&high, target, target, FILTER);
    if sharpen {
        unsharp_mask(&out, SHARPEN_RADIUS, SHARPEN_AMOUNT, SHARPEN_THRESHOLD)
    } else {
        out
    }
}

/// Unsharp mask over the color channels; alpha is left untouched.
pub fn unsharp_mask(img: &RgbaImage, radius: f32, amount: f32, threshold: i32) -> RgbaImage {
    let blurred = imageops::blur(img, radius);
    let mut out = img.clone();
    for (dst, soft) in out.pixels_mut().zip(blurred.pixels()) {
        for c in 0..3 {
            let orig = dst.0[c] as i32;
            let diff = orig - soft.0[c] as i32;
            if diff.abs() >= threshold {
                let sharpened = orig as f32 + diff as f32 * amount;
                dst.0[c] = sharpened.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
    out
}

/// Superellipse mask: opaque where |u|^n + |v|^n <= 1 over [-1, 1]^2.
pub fn squircle_mask(size: u32, exponent: f64) -> GrayImage {
    let mut mask = GrayImage::new(size, size);
    if size == 1 {
        mask.put_pixel(0, 0, Luma([255]));
    }
    if size < 2 {
        return mask;
    }
    let span = (size - 1) as f64;
    for y in 0..size {
        let v = 2.0 * y as f64 / span - 1.0;
        for x in 0..size {
            let u = 2.0 * x as f64 / span - 1.0;
            if u.abs().powf(exponent) + v.abs().powf(exponent) <= 1.0 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
    }
    mask
}

/// Resize to `size` x `size` and clear everything outside the squircle.
pub fn apply_squircle_mask(img: &RgbaImage, size: u32, exponent: f64) -> RgbaImage {
    let resized = if img.dimensions() == (size, size) {
        img.clone()
    } else {
        imageops::resize(img, size, size, FILTER)
    };
    let mask = squircle_mask(size, exponent);
    let mut out = RgbaImage::from_pixel(size, size, Rgba([0, 0, 0, 0]));
    for (x, y, m) in mask.enumerate_pixels() {
        if m.0[0] == 255 {
            out.put_pixel(x, y, *resized.get_pixel(x, y));
        }
    }
    out
}

// --- Asset rendering ---

pub fn render_icon(source: Option<&DynamicImage>) -> [(&'static str, RgbaImage); 2] {
    match source {
        Some(img) => {
            let icon_2x = produce_fixed_asset(img, ICON_SIZE_2X, false);
            let icon_1x = produce_fixed_asset(img, ICON_SIZE, true);
            [
                (ICON_2X_FILE, apply_squircle_mask(&icon_2x, ICON_SIZE_2X, SQUIRCLE_EXPONENT)),
                (ICON_FILE, apply_squircle_mask(&icon_1x, ICON_SIZE, SQUIRCLE_EXPONENT)),
            ]
        }
        None => {
            let flat = RgbaImage::from_pixel(ICON_SIZE_2X, ICON_SIZE_2X, PLACEHOLDER_COLOR);
            let icon_2x = apply_squircle_mask(&flat, ICON_SIZE_2X, SQUIRCLE_EXPONENT);
            let icon_1x = imageops::resize(&icon_2x, ICON_SIZE, ICON_SIZE, FILTER);
            [(ICON_2X_FILE, icon_2x), (ICON_FILE, icon_1x)]
        }
    }
}

/// Letterbox the logo into the standard canvas: shrunk to fit the 2x bounds,
/// left-aligned and vertically centered on a transparent background.
pub fn render_logo(source: &DynamicImage) -> [(&'static str, RgbaImage); 2] {
    let rgba = source.to_rgba8();
    let (w, h) = fit_within(rgba.dimensions(), LOGO_MAX_2X);
    let scaled = if (w, h) == rgba.dimensions() {
        rgba
    } else {
        imageops::resize(&rgba, w, h, FILTER)
    };
    let mut canvas = RgbaImage::new(LOGO_CANVAS_2X.0, LOGO_CANVAS_2X.1);
    let y_offset = (LOGO_CANVAS_2X.1 - h) / 2;
    imageops::overlay(&mut canvas, &scaled, 0, i64::from(y_offset));
    let logo_1x = imageops::resize(&canvas, LOGO_CANVAS.0, LOGO_CANVAS.1, FILTER);
    [(LOGO_2X_FILE, canvas), (LOGO_FILE, logo_1x)]
}

pub fn render_strip(source: &DynamicImage) -> [(&'static str, RgbaImage); 2] {
    let strip_2x = cover_fit(&source.to_rgba8(), STRIP_SIZE_2X.0, STRIP_SIZE_2X.1);
    let strip_1x = imageops::resize(&strip_2x, STRIP_SIZE.0, STRIP_SIZE.1, FILTER);
    [(STRIP_2X_FILE, strip_2x), (STRIP_FILE, strip_1x)]
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

/// PNG buffers for one pass, keyed by archive file name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedAssets {
    files: BTreeMap<String, Vec<u8>>,
}

impl GeneratedAssets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, png: Vec<u8>) {
        self.files.insert(name.to_string(), png);
    }

    fn insert_rendered(&mut self, rendered: impl IntoIterator<Item = (&'static str, RgbaImage)>) {
        for (name, img) in rendered {
            match encode_png(&img) {
                Ok(png) => self.insert(name, png),
                Err(e) => warn!(file = name, error = %e, "asset encoding failed, omitting"),
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    pub fn has_strip(&self) -> bool {
        self.contains(STRIP_FILE) || self.contains(STRIP_2X_FILE)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Produces the icon, logo and strip buffers for a style.
pub struct AssetGenerator<'a> {
    style: &'a StyleConfig,
    loader: ImageLoader,
}

impl<'a> AssetGenerator<'a> {
    pub fn new(style: &'a StyleConfig, loader: ImageLoader) -> Self {
        Self { style, loader }
    }

    /// Filename-matched fallback first, then the branded defaults.
    pub fn fallback_candidates(&self, filename: &str) -> Vec<PathBuf> {
        std::iter::once(filename)
            .chain(self.style.fallback_images.iter().map(String::as_str))
            .map(|name| self.style.assets_dir.join(name))
            .collect()
    }

    fn load_with_fallbacks(&self, source: Option<&str>, fallback_file: &str) -> ImageLoad {
        let primary = self.loader.load(source);
        let candidates = self.fallback_candidates(fallback_file);
        with_fallbacks(primary, &candidates, |path| self.loader.load_path(path))
    }

    pub fn generate(&self) -> GeneratedAssets {
        let mut assets = GeneratedAssets::new();

        match self.load_with_fallbacks(self.style.icon.as_deref(), ICON_FILE) {
            ImageLoad::Loaded(icon) => assets.insert_rendered(render_icon(Some(&icon))),
            ImageLoad::Unavailable(reason) => {
                warn!(%reason, "no icon image, generating placeholder");
                assets.insert_rendered(render_icon(None));
            }
        }

        match self.load_with_fallbacks(self.style.logo.as_deref(), LOGO_FILE) {
            ImageLoad::Loaded(logo) => assets.insert_rendered(render_logo(&logo)),
            ImageLoad::Unavailable(reason) => warn!(%reason, "no logo image, omitting logo"),
        }

        match self.loader.load(self.style.strip.as_deref()) {
            ImageLoad::Loaded(strip) => assets.insert_rendered(render_strip(&strip)),
            ImageLoad::Unavailable(UnavailableReason::NotConfigured) => {}
            ImageLoad::Unavailable(reason) => warn!(%reason, "no strip image, omitting strip"),
        }

        assets
    }
}
