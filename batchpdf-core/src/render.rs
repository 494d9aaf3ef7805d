//! Text to PDF rendering.
//!
//! The pipeline only relies on [`Render`]: one joined string in, document
//! bytes out. [`PdfRenderer`] lays the text out on A4 pages in the builtin
//! Courier font. The text block is written twice, each copy framed by
//! horizontal rules; the second copy's rules sit slightly offset.

use printpdf::{
    BuiltinFont, Color, Line, LinePoint, Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, Point, Pt,
    Rgb, TextItem,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::RenderError;

/// File extension of rendered documents, without the dot.
pub const PDF_EXTENSION: &str = "pdf";

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
/// Courier advance width as a fraction of the font size.
const COURIER_ADVANCE: f32 = 0.6;
const LINE_SPACING: f32 = 1.2;
/// Vertical shift of the rules around the second text block.
const OFFSET_RULE_PT: f32 = 2.02;

pub trait Render: Send + Sync {
    /// Extension of produced documents, e.g. `pdf`.
    fn extension(&self) -> &str;

    fn render(&self, text: &str) -> Result<Vec<u8>, RenderError>;
}

/// Join record lines into the single string handed to the renderer.
pub fn join_lines<S: AsRef<str>>(lines: &[S], separator: &str) -> String {
    let mut out = String::new();
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            out.push_str(separator);
        }
        out.push_str(line.as_ref());
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderOptions {
    pub title: String,
    pub font_size_pt: f32,
    pub margin_mm: f32,
    pub rule_thickness_pt: f32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            title: "batchpdf".to_string(),
            font_size_pt: 10.0,
            margin_mm: 20.0,
            rule_thickness_pt: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Block {
    Text(String),
    Rule { offset_pt: f32 },
}

#[derive(Debug, Clone)]
pub struct PdfRenderer {
    options: RenderOptions,
}

impl PdfRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    fn line_height(&self) -> f32 {
        self.options.font_size_pt * LINE_SPACING
    }

    fn printable_width_pt(&self) -> f32 {
        Pt::from(Mm(PAGE_WIDTH_MM - 2.0 * self.options.margin_mm)).0
    }

    fn chars_per_line(&self) -> usize {
        (self.printable_width_pt() / (self.options.font_size_pt * COURIER_ADVANCE)).floor() as usize
    }

    fn validate(&self) -> Result<(), RenderError> {
        let o = &self.options;
        if !(o.font_size_pt > 0.0) {
            return Err(RenderError::Layout(format!(
                "font size must be positive, got {}",
                o.font_size_pt
            )));
        }
        if !(o.margin_mm >= 0.0) || 2.0 * o.margin_mm >= PAGE_WIDTH_MM.min(PAGE_HEIGHT_MM) {
            return Err(RenderError::Layout(format!(
                "margin of {}mm leaves no printable area",
                o.margin_mm
            )));
        }
        if self.chars_per_line() == 0 {
            return Err(RenderError::Layout(
                "printable width is narrower than one character".into(),
            ));
        }
        let printable_height = Pt::from(Mm(PAGE_HEIGHT_MM - 2.0 * o.margin_mm)).0;
        if printable_height < 2.0 * self.line_height() {
            return Err(RenderError::Layout(
                "printable height is shorter than one text line".into(),
            ));
        }
        Ok(())
    }

    fn blocks(&self, text: &str) -> Vec<Block> {
        let wrapped = wrap(text, self.chars_per_line());
        let mut blocks = Vec::with_capacity(2 * wrapped.len() + 4);
        for offset_pt in [0.0, OFFSET_RULE_PT] {
            blocks.push(Block::Rule { offset_pt });
            blocks.extend(wrapped.iter().cloned().map(Block::Text));
            blocks.push(Block::Rule { offset_pt });
        }
        blocks
    }

    /// Distribute blocks over pages, top to bottom.
    fn paginate(&self, blocks: Vec<Block>) -> Vec<Vec<Op>> {
        let margin = Pt::from(Mm(self.options.margin_mm)).0;
        let top = Pt::from(Mm(PAGE_HEIGHT_MM)).0 - margin;
        let left = margin;
        let right = Pt::from(Mm(PAGE_WIDTH_MM)).0 - margin;
        let line_height = self.line_height();
        let font_size = Pt(self.options.font_size_pt);

        let mut pages = Vec::new();
        let mut ops = Vec::new();
        let mut y = top;
        for block in blocks {
            let height = match block {
                Block::Text(_) => line_height,
                Block::Rule { .. } => line_height / 2.0,
            };
            if y - height < margin {
                pages.push(std::mem::take(&mut ops));
                y = top;
            }
            y -= height;
            match block {
                Block::Text(line) => {
                    ops.push(Op::StartTextSection);
                    ops.push(Op::SetTextCursor {
                        pos: Point { x: Pt(left), y: Pt(y) },
                    });
                    ops.push(Op::SetFontSizeBuiltinFont {
                        size: font_size,
                        font: BuiltinFont::Courier,
                    });
                    ops.push(Op::WriteTextBuiltinFont {
                        items: vec![TextItem::Text(line)],
                        font: BuiltinFont::Courier,
                    });
                    ops.push(Op::EndTextSection);
                }
                Block::Rule { offset_pt } => {
                    let ry = y + height / 2.0 + self.options.rule_thickness_pt / 2.0 + offset_pt;
                    ops.extend(rule_ops(left, right, ry, self.options.rule_thickness_pt));
                }
            }
        }
        pages.push(ops);
        pages
    }
}

impl Default for PdfRenderer {
    fn default() -> Self {
        Self::new(RenderOptions::default())
    }
}

impl Render for PdfRenderer {
    fn extension(&self) -> &str {
        PDF_EXTENSION
    }

    fn render(&self, text: &str) -> Result<Vec<u8>, RenderError> {
        self.validate()?;
        let pages: Vec<PdfPage> = self
            .paginate(self.blocks(text))
            .into_iter()
            .map(|ops| PdfPage::new(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), ops))
            .collect();
        let page_count = pages.len();

        let mut doc = PdfDocument::new(&self.options.title);
        let mut warnings = Vec::new();
        let bytes = doc
            .with_pages(pages)
            .save(&PdfSaveOptions::default(), &mut warnings);
        debug!(
            pages = page_count,
            bytes = bytes.len(),
            warnings = warnings.len(),
            "Rendered PDF document"
        );
        Ok(bytes)
    }
}

fn rule_ops(x1: f32, x2: f32, y: f32, thickness: f32) -> Vec<Op> {
    let point = |x: f32| LinePoint {
        p: Point { x: Pt(x), y: Pt(y) },
        bezier: false,
    };
    vec![
        Op::SaveGraphicsState,
        Op::SetOutlineColor {
            col: Color::Rgb(Rgb {
                r: 0.0,
                g: 0.0,
                b: 0.0,
                icc_profile: None,
            }),
        },
        Op::SetOutlineThickness { pt: Pt(thickness) },
        Op::DrawLine {
            line: Line {
                points: vec![point(x1), point(x2)],
                is_closed: false,
            },
        },
        Op::RestoreGraphicsState,
    ]
}

/// Greedy word wrap at `width` characters. Words longer than a line are split.
fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.lines() {
        let mut current = String::new();
        let mut current_len = 0usize;
        for word in paragraph.split_whitespace() {
            let mut chars: Vec<char> = word.chars().collect();
            while chars.len() > width {
                if current_len > 0 {
                    lines.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                let rest = chars.split_off(width);
                lines.push(chars.into_iter().collect());
                chars = rest;
            }
            let word_len = chars.len();
            let needed = if current_len == 0 { word_len } else { current_len + 1 + word_len };
            if needed > width {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if current_len > 0 {
                current.push(' ');
                current_len += 1;
            }
            current.extend(chars);
            current_len += word_len;
        }
        if current_len > 0 || lines.is_empty() {
            lines.push(current);
        }
    }
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}
