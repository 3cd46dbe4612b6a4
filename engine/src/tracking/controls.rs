//! Virtual on-screen controls and pointer hit testing.
//!
//! A brush button and an eraser button are stacked in the top-right corner
//! with a column of color swatches below them.  The overlay is drawn
//! mirrored relative to the canvas, so hit testing flips the pointer x.

use super::landmarks::Point;

/// Preset stroke colors.  The first `LayoutConfig::color_zones` back the
/// color swatches.
pub const PALETTE: [&str; 7] = [
    "#ff5c8d", "#ffb347", "#ffe066", "#4ade80", "#60a5fa", "#c084fc", "#111827",
];

// ── Zone identity ──────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ZoneId {
    Brush,
    Eraser,
    /// Index into [`PALETTE`].
    Color(usize),
}

impl ZoneId {
    /// String representation for IPC (`brush`, `eraser`, `color:N`).
    pub fn as_str(&self) -> String {
        match self {
            Self::Brush => "brush".to_string(),
            Self::Eraser => "eraser".to_string(),
            Self::Color(i) => format!("color:{}", i),
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "brush" => Some(Self::Brush),
            "eraser" => Some(Self::Eraser),
            _ => {
                let index = s.strip_prefix("color:")?.parse().ok()?;
                (index < PALETTE.len()).then_some(Self::Color(index))
            }
        }
    }

    /// Palette color behind a color zone.
    pub fn color(&self) -> Option<&'static str> {
        match self {
            Self::Color(i) => PALETTE.get(*i).copied(),
            _ => None,
        }
    }
}

// ── Zone geometry ──────────────────────────────────────────

/// How a zone is drawn.  Hit testing always uses the bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneShape {
    Rect,
    Circle,
}

impl ZoneShape {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rect => "rect",
            Self::Circle => "circle",
        }
    }
}

/// One control zone in unmirrored overlay coordinates (pixels).
#[derive(Debug, Clone, PartialEq)]
pub struct ControlZone {
    pub id: ZoneId,
    pub shape: ZoneShape,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl ControlZone {
    /// Whether point (px, py) is inside this zone's bounding box.
    pub fn contains(&self, px: f32, py: f32) -> bool {
        px >= self.x && px <= self.x + self.width && py >= self.y && py <= self.y + self.height
    }

    pub fn to_sexp(&self) -> String {
        format!(
            "(:id \"{}\" :shape :{} :x {:.1} :y {:.1} :width {:.1} :height {:.1})",
            self.id.as_str(),
            self.shape.as_str(),
            self.x,
            self.y,
            self.width,
            self.height,
        )
    }
}

// ── Layout ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LayoutConfig {
    /// Side of the brush and eraser squares.
    pub button_size: f32,
    /// Distance from the top and right canvas edges.
    pub margin: f32,
    /// Gap between the brush and eraser squares.
    pub button_gap: f32,
    /// Diameter of a color swatch.
    pub color_diameter: f32,
    /// Gap between consecutive color swatches.
    pub color_gap: f32,
    /// Gap between the eraser and the first swatch.
    pub color_row_offset: f32,
    /// Number of color swatches (capped at the palette size).
    pub color_zones: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            button_size: 80.0,
            margin: 20.0,
            button_gap: 10.0,
            color_diameter: 54.0,
            color_gap: 12.0,
            color_row_offset: 20.0,
            color_zones: 4,
        }
    }
}

/// Zone layout for one canvas size.  Cheap to rebuild; callers recompute it
/// whenever the canvas dimensions change.
#[derive(Debug, Clone)]
pub struct ControlLayout {
    width: u32,
    height: u32,
    zones: Vec<ControlZone>,
}

impl ControlLayout {
    /// Build the layout for a `width` x `height` canvas.  A degenerate canvas
    /// gets no zones.
    pub fn compute(config: &LayoutConfig, width: u32, height: u32) -> Self {
        let mut zones = Vec::new();
        if width > 0 && height > 0 {
            let w = width as f32;
            let button_x = w - config.button_size - config.margin;
            let brush_y = config.margin;
            let eraser_y = brush_y + config.button_size + config.button_gap;

            zones.push(ControlZone {
                id: ZoneId::Brush,
                shape: ZoneShape::Rect,
                x: button_x,
                y: brush_y,
                width: config.button_size,
                height: config.button_size,
            });
            zones.push(ControlZone {
                id: ZoneId::Eraser,
                shape: ZoneShape::Rect,
                x: button_x,
                y: eraser_y,
                width: config.button_size,
                height: config.button_size,
            });

            let color_x = w - config.color_diameter - config.margin;
            let color_top = eraser_y + config.button_size + config.color_row_offset;
            for i in 0..config.color_zones.min(PALETTE.len()) {
                zones.push(ControlZone {
                    id: ZoneId::Color(i),
                    shape: ZoneShape::Circle,
                    x: color_x,
                    y: color_top + i as f32 * (config.color_diameter + config.color_gap),
                    width: config.color_diameter,
                    height: config.color_diameter,
                });
            }
        }
        Self {
            width,
            height,
            zones,
        }
    }

    pub fn zones(&self) -> &[ControlZone] {
        &self.zones
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Zone under a canvas-space pointer.  The pointer x is mirrored into
    /// overlay space before testing; first match wins.
    pub fn hit_test(&self, pointer: Point) -> Option<ZoneId> {
        if self.zones.is_empty() || !pointer.is_finite() {
            return None;
        }
        let x = self.width as f32 - pointer.x;
        self.zones
            .iter()
            .find(|z| z.contains(x, pointer.y))
            .map(|z| z.id)
    }

    /// Generate s-expression for IPC layout queries.
    pub fn to_sexp(&self) -> String {
        format!(
            "(:width {} :height {} :zones ({}))",
            self.width,
            self.height,
            self.zones
                .iter()
                .map(ControlZone::to_sexp)
                .collect::<Vec<_>>()
                .join(" ")
        )
    }
}
