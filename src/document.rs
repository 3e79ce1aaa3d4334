//! Document-collaborator interface: the typed boundary between the
//! core and an external typeset-document generator.
//!
//! The document generator itself is out of scope for this crate — it is an
//! external collaborator, consuming only documented interfaces. This
//! module is that interface: a `DocumentSink` trait a driver can
//! implement against any concrete layout library, plus the flow-item and
//! style types the rule/grammar engines' output naturally maps onto (an
//! action's rendered prose becomes a paragraph; a fact-list appendix becomes
//! a run of paragraphs; a title page becomes a style change plus a page
//! break). No invariants cross this boundary beyond well-formed calls.

use std::fmt;

/// A color, named the way the original document generator's `style()`
/// accepted them (`"black"`, `"white"`, ...). Kept as an opaque string
/// rather than an RGB type: the core never inspects a color, it only
/// threads author-supplied names through to the sink.
pub type ColorName = String;

/// Paragraph alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Left,
    Center,
    Right,
    Justify,
}

impl fmt::Display for Alignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Alignment::Left => "left",
            Alignment::Center => "center",
            Alignment::Right => "right",
            Alignment::Justify => "justify",
        };
        write!(f, "{s}")
    }
}

/// The document's page dimensions, in inches (the unit the original PDF
/// generator's constructor used throughout).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub width_in: f64,
    pub height_in: f64,
}

/// Left/right and top/bottom page margins, in inches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margins {
    pub x_in: f64,
    pub y_in: f64,
}

/// A style declaration; every field is optional because `style()` only
/// overrides the attributes a caller actually names, leaving the rest as
/// they were.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Style {
    pub font_name: Option<String>,
    pub font_size: Option<f64>,
    pub font_color: Option<ColorName>,
    pub left_indent_in: Option<f64>,
    pub right_indent_in: Option<f64>,
    pub alignment: Option<Alignment>,
    pub background_color: Option<ColorName>,
    pub background_padding_pt: Option<f64>,
    pub leading_pt: Option<f64>,
    pub space_between_paragraphs_pt: Option<f64>,
}

impl Style {
    pub fn new() -> Self {
        Style::default()
    }

    pub fn alignment(mut self, alignment: Alignment) -> Self {
        self.alignment = Some(alignment);
        self
    }

    pub fn font_color(mut self, color: impl Into<ColorName>) -> Self {
        self.font_color = Some(color.into());
        self
    }

    pub fn background_color(mut self, color: impl Into<ColorName>) -> Self {
        self.background_color = Some(color.into());
        self
    }

    pub fn leading(mut self, points: f64) -> Self {
        self.leading_pt = Some(points);
        self
    }

    pub fn space_between_paragraphs(mut self, points: f64) -> Self {
        self.space_between_paragraphs_pt = Some(points);
        self
    }

    pub fn background_padding(mut self, points: f64) -> Self {
        self.background_padding_pt = Some(points);
        self
    }
}

/// How an image should be scaled when inserted: optional width, with
/// proportional scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ImageScale {
    /// Render at the image's native size.
    Native,
    /// Render at `width_in` inches wide, scaling height to preserve the
    /// image's aspect ratio.
    ProportionalWidth { width_in: f64 },
}

/// One piece of document content, in the order a driver appends it.
/// Newlines inside paragraph text split into separate paragraphs, and a
/// pair of adjacent spaces is preserved rather than collapsed —
/// both are the sink implementation's responsibility, not the core's; this
/// type only carries the text through unmodified.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowItem {
    Paragraph { text: String, style: Style },
    Spacer { height_in: f64 },
    PageBreak,
    Image { filename: String, scale: ImageScale },
}

/// The boundary the core's driver calls through to emit a document. A
/// concrete implementation wraps whatever external layout library the
/// application links against; this crate ships no implementation of its
/// own.
pub trait DocumentSink {
    /// Open a new document. Implementations typically defer actually
    /// opening a file handle until `finalize` if their backing library
    /// requires all flowables up front.
    fn open(&mut self, filename: &str, page_size: PageSize, margins: Margins, initial_style: Style);

    /// Change the current style. Subsequent `append_paragraph` calls use
    /// the new style until the next `set_style` call.
    fn set_style(&mut self, style: Style);

    /// Append a paragraph of text in the current style.
    fn append_paragraph(&mut self, text: &str);

    /// Append vertical whitespace.
    fn append_spacer(&mut self, height_in: f64);

    /// Append a page break.
    fn append_page_break(&mut self);

    /// Append an image.
    fn append_image(&mut self, filename: &str, scale: ImageScale);

    /// Finalize and emit the document. `page_numbers` turns on page
    /// numbering for every page after the first.
    fn finalize(&mut self, page_numbers: bool);
}

/// A simple in-memory `DocumentSink` used for testing drivers and for the
/// demo binary (`src/bin/mystery_demo.rs`) when no real layout library is
/// wired in: it records every call as a `FlowItem` (plus the open/style/
/// finalize metadata) instead of rendering anything, so a driver's output
/// can be asserted against directly.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub filename: String,
    pub page_size: Option<PageSize>,
    pub margins: Option<Margins>,
    pub current_style: Style,
    pub items: Vec<FlowItem>,
    pub finalized: bool,
    pub page_numbers: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        RecordingSink::default()
    }

    pub fn paragraphs(&self) -> Vec<&str> {
        self.items
            .iter()
            .filter_map(|item| match item {
                FlowItem::Paragraph { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl DocumentSink for RecordingSink {
    fn open(&mut self, filename: &str, page_size: PageSize, margins: Margins, initial_style: Style) {
        self.filename = filename.to_string();
        self.page_size = Some(page_size);
        self.margins = Some(margins);
        self.current_style = initial_style;
    }

    fn set_style(&mut self, style: Style) {
        self.current_style = style;
    }

    fn append_paragraph(&mut self, text: &str) {
        self.items.push(FlowItem::Paragraph { text: text.to_string(), style: self.current_style.clone() });
    }

    fn append_spacer(&mut self, height_in: f64) {
        self.items.push(FlowItem::Spacer { height_in });
    }

    fn append_page_break(&mut self) {
        self.items.push(FlowItem::PageBreak);
    }

    fn append_image(&mut self, filename: &str, scale: ImageScale) {
        self.items.push(FlowItem::Image { filename: filename.to_string(), scale });
    }

    fn finalize(&mut self, page_numbers: bool) {
        self.finalized = true;
        self.page_numbers = page_numbers;
    }
}
