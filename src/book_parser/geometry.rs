//! 纸张尺寸目录与版心计算。

use tracing::debug;

use super::error::GeneratorError;

/// A4 in points; also the fallback for unknown page types.
pub const A4: (f32, f32) = (595.28, 841.89);

/// A named page size, optionally carrying the margins and font sizes a device
/// preset implies.
#[derive(Debug, Clone, PartialEq)]
pub struct PagePreset {
    pub page_type: String,
    pub width: f32,
    pub height: f32,
    pub margins: Option<(f32, f32)>,
    pub font_sizes: Option<(u32, u32)>,
}

impl PagePreset {
    /// Resolves a page-type identifier (case-insensitive). Unknown identifiers
    /// resolve to A4 rather than failing.
    pub fn lookup(page_type: &str) -> Self {
        let id = page_type.trim().to_ascii_lowercase();
        let mut margins = None;
        let mut font_sizes = None;

        // https://www.cl.cam.ac.uk/~mgk25/iso-paper-ps.txt
        let (width, height) = match id.as_str() {
            "a0" => (2384.0, 3370.0),
            "a1" => (1684.0, 2384.0),
            "a2" => (1191.0, 1684.0),
            "a3" => (842.0, 1191.0),
            "a4" | "dxg" | "10inch" => A4,
            "a5" => (420.0, 595.0),
            "a6" => (298.0, 420.0),
            "b0" => (2835.0, 4008.0),
            "b1" => (2004.0, 2835.0),
            "b2" => (1417.0, 2004.0),
            "b3" => (1001.0, 1417.0),
            "b4" => (709.0, 1001.0),
            "b5" => (499.0, 709.0),
            "b6" => (354.0, 499.0),
            "c0" => (2599.0, 3677.0),
            "c1" => (1837.0, 2599.0),
            "c2" => (1298.0, 1837.0),
            "c3" => (918.0, 1298.0),
            "c4" => (649.0, 918.0),
            "c5" => (459.0, 649.0),
            "c6" => (323.0, 459.0),
            // 90mm x 117mm
            "6inch" => (255.12, 331.65),
            "7inch" => (297.64, 386.93),
            "pc" => {
                margins = Some((72.0, 89.9));
                font_sizes = Some((16, 12));
                A4
            }
            "mobile" => {
                font_sizes = Some((32, 28));
                A4
            }
            other => {
                debug!("未知纸张类型 '{other}'，按 A4 处理");
                A4
            }
        };

        Self {
            page_type: if id.is_empty() { "a4".to_string() } else { id },
            width,
            height,
            margins,
            font_sizes,
        }
    }
}

/// Page size plus margins; the content box is what remains inside the margins
/// on both sides.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub page_width: f32,
    pub page_height: f32,
    pub left_margin: f32,
    pub top_margin: f32,
}

impl PageGeometry {
    pub fn new(
        page_width: f32,
        page_height: f32,
        left_margin: f32,
        top_margin: f32,
    ) -> Result<Self, GeneratorError> {
        let geometry = Self {
            page_width,
            page_height,
            left_margin,
            top_margin,
        };
        geometry.validate()?;
        Ok(geometry)
    }

    pub fn from_preset(preset: &PagePreset, left_margin: f32, top_margin: f32) -> Result<Self, GeneratorError> {
        let (left, top) = preset.margins.unwrap_or((left_margin, top_margin));
        Self::new(preset.width, preset.height, left, top)
    }

    /// Same page size, new margins.
    pub fn with_margins(&self, left_margin: f32, top_margin: f32) -> Result<Self, GeneratorError> {
        Self::new(self.page_width, self.page_height, left_margin, top_margin)
    }

    pub fn content_width(&self) -> f32 {
        self.page_width - 2.0 * self.left_margin
    }

    pub fn content_height(&self) -> f32 {
        self.page_height - 2.0 * self.top_margin
    }

    fn validate(&self) -> Result<(), GeneratorError> {
        let valid = self.left_margin >= 0.0
            && self.top_margin >= 0.0
            && self.content_width() > 0.0
            && self.content_height() > 0.0;
        if valid {
            Ok(())
        } else {
            Err(GeneratorError::InvalidGeometry {
                width: self.page_width,
                height: self.page_height,
                left: self.left_margin,
                top: self.top_margin,
            })
        }
    }
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self {
            page_width: A4.0,
            page_height: A4.1,
            left_margin: 10.0,
            top_margin: 10.0,
        }
    }
}
