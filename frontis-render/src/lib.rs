use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use image::{ImageFormat, Rgba};
use imageproc::drawing::draw_text_mut;
use printpdf::image::RawImage;
use printpdf::xobject::{XObject, XObjectTransform};
use printpdf::{Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, Pt, XObjectId};
use thiserror::Error;

use frontis_types::{ArtifactFormat, ResolvedSelection};

// Overlay geometry is fixed, matched to the template asset.
const START_X: i32 = 530;
const START_Y: i32 = 1060;
const LINE_GAP: i32 = 87;
const FONT_SIZE: f32 = 45.0;
const FILL: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Resolution used when wrapping the composited raster in a PDF page.
const PDF_DPI: f32 = 300.0;

#[derive(Debug, Error)]
pub enum RenderError {
    /// Template or font asset missing or unreadable. Fatal for the request;
    /// never retried.
    #[error("asset unavailable: {0}")]
    AssetUnavailable(String),
    #[error("encode error: {0}")]
    Encode(String),
}

#[derive(Debug)]
pub struct RenderedCover {
    pub bytes: Vec<u8>,
    pub format: ArtifactFormat,
}

/// Compositing seam. Implementations must be pure: no catalog access, no
/// side effects, identical bytes for identical inputs and assets.
pub trait CoverRenderer: Send + Sync {
    fn render(
        &self,
        selection: &ResolvedSelection,
        format: ArtifactFormat,
    ) -> Result<RenderedCover, RenderError>;
}

/// Draws the seven overlay lines onto the fixed background template.
///
/// Assets are re-read on every call: swapping the template on disk takes
/// effect on the next request, and a missing asset surfaces as a
/// per-request `AssetUnavailable`.
pub struct TemplateCoverRenderer {
    template_path: PathBuf,
    font_path: PathBuf,
}

impl TemplateCoverRenderer {
    pub fn new(template_path: impl AsRef<Path>, font_path: impl AsRef<Path>) -> Self {
        Self {
            template_path: template_path.as_ref().to_path_buf(),
            font_path: font_path.as_ref().to_path_buf(),
        }
    }
}

impl CoverRenderer for TemplateCoverRenderer {
    fn render(
        &self,
        selection: &ResolvedSelection,
        format: ArtifactFormat,
    ) -> Result<RenderedCover, RenderError> {
        let template = fs::read(&self.template_path).map_err(|e| {
            RenderError::AssetUnavailable(format!(
                "template {}: {e}",
                self.template_path.display()
            ))
        })?;
        let mut canvas = image::load_from_memory(&template)
            .map_err(|e| {
                RenderError::AssetUnavailable(format!(
                    "template {}: {e}",
                    self.template_path.display()
                ))
            })?
            .to_rgba8();

        let font_bytes = fs::read(&self.font_path).map_err(|e| {
            RenderError::AssetUnavailable(format!("font {}: {e}", self.font_path.display()))
        })?;
        let font = FontVec::try_from_vec(font_bytes).map_err(|e| {
            RenderError::AssetUnavailable(format!("font {}: {e}", self.font_path.display()))
        })?;

        let scale = PxScale::from(FONT_SIZE);
        for (i, line) in selection.overlay_lines().iter().enumerate() {
            let y = START_Y + i as i32 * LINE_GAP;
            draw_text_mut(&mut canvas, FILL, START_X, y, scale, &font, line);
        }

        let mut png = Vec::new();
        canvas
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| RenderError::Encode(e.to_string()))?;

        let bytes = match format {
            ArtifactFormat::Png => png,
            ArtifactFormat::Pdf => png_to_pdf_page(&png)?,
        };
        Ok(RenderedCover { bytes, format })
    }
}

/// Embed the composited raster as the sole content of a single PDF page
/// sized to the image at the fixed resolution.
fn png_to_pdf_page(png: &[u8]) -> Result<Vec<u8>, RenderError> {
    let mut decode_warnings = Vec::new();
    let raw = RawImage::decode_from_bytes(png, &mut decode_warnings)
        .map_err(|e| RenderError::Encode(format!("pdf image decode: {e}")))?;
    let (width_px, height_px) = (raw.width as f32, raw.height as f32);

    let mut doc = PdfDocument::new("Front Page Cover");
    let xobj_id = XObjectId::new();
    doc.resources
        .xobjects
        .map
        .insert(xobj_id.clone(), XObject::Image(raw));

    let width_mm = width_px / PDF_DPI * 25.4;
    let height_mm = height_px / PDF_DPI * 25.4;
    let ops = vec![Op::UseXobject {
        id: xobj_id,
        transform: XObjectTransform {
            translate_x: Some(Pt(0.0)),
            translate_y: Some(Pt(0.0)),
            scale_x: None,
            scale_y: None,
            rotate: None,
            dpi: Some(PDF_DPI),
        },
    }];
    doc.pages.push(PdfPage::new(Mm(width_mm), Mm(height_mm), ops));

    let mut save_warnings = Vec::new();
    Ok(doc.save(&PdfSaveOptions::default(), &mut save_warnings))
}

/// Stub renderer: echoes the overlay lines as the artifact body. Lets the
/// orchestrator and its tests run without the template/font assets.
pub struct NullCoverRenderer;

impl CoverRenderer for NullCoverRenderer {
    fn render(
        &self,
        selection: &ResolvedSelection,
        format: ArtifactFormat,
    ) -> Result<RenderedCover, RenderError> {
        let bytes = selection.overlay_lines().join("\n").into_bytes();
        Ok(RenderedCover { bytes, format })
    }
}
