//! Rasterization of exported SVG markup.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub struct RasterOptions {
    pub scale: f32,
    pub background: String,
    /// Whether markup referencing external resources may be rasterized.
    pub allow_cross_origin: bool,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self {
            scale: 2.0,
            background: "#FFFFFF".to_string(),
            allow_cross_origin: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("svg could not be loaded for rasterization: {0}")]
    Load(String),
    #[error("markup references external content ({0}) and cross-origin content is not allowed")]
    Tainted(String),
    #[error("failed to allocate a {width}x{height} raster surface")]
    Allocation { width: u32, height: u32 },
    #[error("invalid background color `{0}`")]
    Background(String),
    #[error("raster surface could not be encoded as png")]
    PngEncoding,
    #[error("rasterization task failed: {0}")]
    Task(String),
}

/// A rendered RGBA raster with its PNG encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterSurface {
    pub width: u32,
    pub height: u32,
    png: Vec<u8>,
}

impl RasterSurface {
    pub fn new(width: u32, height: u32, png: Vec<u8>) -> Self {
        Self { width, height, png }
    }

    /// PNG bytes of the surface. PNG is lossless, so `quality` only has to
    /// be a valid factor in `(0, 1]`.
    pub fn encode_png(self, quality: f32) -> Result<Vec<u8>, RasterError> {
        if !(quality > 0.0 && quality <= 1.0) || self.png.is_empty() {
            return Err(RasterError::PngEncoding);
        }
        Ok(self.png)
    }
}

#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(&self, svg: &str, options: &RasterOptions) -> Result<RasterSurface, RasterError>;
}

/// Finds `href`s that point outside the document (`http:`, `https:`, `file:`, `//`).
pub fn external_reference(svg: &str) -> Option<String> {
    let doc = roxmltree::Document::parse(svg).ok()?;
    doc.descendants()
        .filter(|n| n.is_element())
        .flat_map(|n| n.attributes())
        .filter(|attr| attr.name() == "href" || attr.name() == "src")
        .map(|attr| attr.value().trim())
        .find(|value| {
            let lowered = value.to_ascii_lowercase();
            lowered.starts_with("http:")
                || lowered.starts_with("https:")
                || lowered.starts_with("file:")
                || lowered.starts_with("//")
        })
        .map(str::to_string)
}

/// Parses `#RGB`, `#RRGGBB` and `#RRGGBBAA`.
pub fn parse_hex_color(value: &str) -> Option<(u8, u8, u8, u8)> {
    let hex = value.trim().strip_prefix('#')?;
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        3 => {
            let mut out = [0u8; 3];
            for (idx, ch) in hex.chars().enumerate() {
                out[idx] = channel(&ch.to_string())? * 17;
            }
            Some((out[0], out[1], out[2], 255))
        }
        6 | 8 => {
            let r = channel(hex.get(0..2)?)?;
            let g = channel(hex.get(2..4)?)?;
            let b = channel(hex.get(4..6)?)?;
            let a = if hex.len() == 8 {
                channel(hex.get(6..8)?)?
            } else {
                255
            };
            Some((r, g, b, a))
        }
        _ => None,
    }
}

#[cfg(feature = "png")]
pub use resvg_backend::ResvgRasterizer;

#[cfg(feature = "png")]
mod resvg_backend {
    use std::sync::Arc;

    use async_trait::async_trait;
    use resvg::tiny_skia;

    use super::{RasterError, RasterOptions, RasterSurface, Rasterizer, external_reference, parse_hex_color};

    /// Rasterizes with `resvg`, loading system fonts once.
    #[derive(Clone)]
    pub struct ResvgRasterizer {
        fontdb: Arc<usvg::fontdb::Database>,
    }

    impl Default for ResvgRasterizer {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ResvgRasterizer {
        pub fn new() -> Self {
            let mut db = usvg::fontdb::Database::new();
            db.load_system_fonts();
            Self { fontdb: Arc::new(db) }
        }
    }

    #[async_trait]
    impl Rasterizer for ResvgRasterizer {
        async fn rasterize(&self, svg: &str, options: &RasterOptions) -> Result<RasterSurface, RasterError> {
            if !options.allow_cross_origin {
                if let Some(reference) = external_reference(svg) {
                    return Err(RasterError::Tainted(reference));
                }
            }
            let svg = svg.to_string();
            let options = options.clone();
            let fontdb = Arc::clone(&self.fontdb);
            tokio::task::spawn_blocking(move || rasterize_blocking(&svg, &options, fontdb))
                .await
                .map_err(|err| RasterError::Task(err.to_string()))?
        }
    }

    fn rasterize_blocking(
        svg: &str,
        options: &RasterOptions,
        fontdb: Arc<usvg::fontdb::Database>,
    ) -> Result<RasterSurface, RasterError> {
        let (r, g, b, a) = parse_hex_color(&options.background)
            .ok_or_else(|| RasterError::Background(options.background.clone()))?;
        let opt = usvg::Options {
            fontdb,
            ..Default::default()
        };
        let tree = usvg::Tree::from_str(svg, &opt).map_err(|err| RasterError::Load(err.to_string()))?;

        let scale = if options.scale.is_finite() && options.scale > 0.0 {
            options.scale
        } else {
            1.0
        };
        let size = tree.size();
        let width = (size.width() * scale).ceil() as u32;
        let height = (size.height() * scale).ceil() as u32;
        let mut pixmap = tiny_skia::Pixmap::new(width, height)
            .ok_or(RasterError::Allocation { width, height })?;
        pixmap.fill(tiny_skia::Color::from_rgba8(r, g, b, a));
        resvg::render(
            &tree,
            tiny_skia::Transform::from_scale(scale, scale),
            &mut pixmap.as_mut(),
        );

        let png = pixmap.encode_png().map_err(|_| RasterError::PngEncoding)?;
        Ok(RasterSurface::new(width, height, png))
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        const SQUARE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="20" viewBox="0 0 40 20"><rect width="10" height="10" fill="#1f6feb"/></svg>"##;

        #[tokio::test]
        async fn rasterizes_at_scale() {
            let surface = ResvgRasterizer::new()
                .rasterize(SQUARE, &RasterOptions::default())
                .await
                .unwrap();
            assert_eq!((surface.width, surface.height), (80, 40));
            let png = surface.encode_png(0.95).unwrap();
            assert_eq!(&png[1..4], b"PNG");
        }

        #[tokio::test]
        async fn refuses_external_content_when_not_allowed() {
            let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" width="10" height="10"><image href="https://example.com/a.png" width="10" height="10"/></svg>"#;
            let options = RasterOptions {
                allow_cross_origin: false,
                ..Default::default()
            };
            let err = ResvgRasterizer::new().rasterize(svg, &options).await.unwrap_err();
            assert!(matches!(err, RasterError::Tainted(_)));
        }
    }
}
