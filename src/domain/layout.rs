// Grid layout engine
//
// Operates only on ids and rectangles in cell coordinates. Invariants held
// after every public call:
//   - no two rectangles overlap
//   - every rectangle has w >= 1, h >= 1 and fits within `max_columns`
//     and `max_rows`
//   - `columns` never decreases except through `reset`
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::widget::LayoutSize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSettings {
    pub min_columns: u32,
    pub max_columns: u32,
    /// Extra columns added beyond the right-most edge when the grid grows.
    pub column_buffer: u32,
    pub cell_width: u32,
    pub cell_height: u32,
    pub margin: u32,
    /// Upper bound on rows visited by the free-slot scan.
    pub max_scan_rows: u32,
    /// No rectangle may reach below this row.
    pub max_rows: u32,
}

impl Default for GridSettings {
    fn default() -> Self {
        Self {
            min_columns: 12,
            max_columns: 48,
            column_buffer: 2,
            cell_width: 80,
            cell_height: 80,
            margin: 8,
            max_scan_rows: 200,
            max_rows: 1_000,
        }
    }
}

impl GridSettings {
    /// Repairs settings that would make the engine unusable.
    pub fn normalized(mut self) -> Self {
        self.min_columns = self.min_columns.max(1);
        self.max_columns = self.max_columns.max(self.min_columns);
        self.max_scan_rows = self.max_scan_rows.max(1);
        self.max_rows = self.max_rows.max(1);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub id: String,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(id: impl Into<String>, x: u32, y: u32, w: u32, h: u32) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            w,
            h,
        }
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.w)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.h)
    }

    pub fn size(&self) -> LayoutSize {
        LayoutSize::new(self.w, self.h)
    }

    pub fn overlaps(&self, other: &Rect) -> bool {
        self.overlaps_area(other.x, other.y, other.w, other.h)
    }

    pub fn overlaps_area(&self, x: u32, y: u32, w: u32, h: u32) -> bool {
        self.x < x.saturating_add(w)
            && self.right() > x
            && self.y < y.saturating_add(h)
            && self.bottom() > y
    }
}

/// Pixel box of a rectangle for the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PixelBox {
    pub left: u64,
    pub top: u64,
    pub width: u64,
    pub height: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Gesture {
    Move,
    Resize,
}

impl Gesture {
    pub fn state(self) -> RectState {
        match self {
            Self::Move => RectState::Moving,
            Self::Resize => RectState::Resizing,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RectState {
    Placed,
    Moving,
    Resizing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Proposal {
    Position { x: u32, y: u32 },
    Size { w: u32, h: u32 },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    #[error("no rectangle with id '{0}'")]
    NotFound(String),
    #[error("rectangle '{0}' is already placed")]
    DuplicateId(String),
    #[error("rectangle '{id}' would overlap '{other}'")]
    Overlap { id: String, other: String },
    #[error("rectangle '{0}' must be at least one cell wide and tall")]
    EmptySize(String),
    #[error("rectangle '{id}' would extend past the {max_columns}-column limit")]
    OutOfBounds { id: String, max_columns: u32 },
    #[error("rectangle '{id}' would extend below row {max_rows}")]
    RowLimit { id: String, max_rows: u32 },
    #[error("rectangle '{id}' is busy ({state:?})")]
    Busy { id: String, state: RectState },
    #[error("rectangle '{0}' is not being moved or resized")]
    NoGesture(String),
    #[error("a {expected:?} gesture cannot apply {proposal:?}")]
    GestureMismatch { expected: Gesture, proposal: Proposal },
}

#[derive(Debug, Clone)]
pub struct GridLayout {
    settings: GridSettings,
    columns: u32,
    rects: Vec<Rect>,
    active: Option<(String, Gesture)>,
}

impl GridLayout {
    pub fn new(settings: GridSettings) -> Self {
        let settings = settings.normalized();
        Self {
            columns: settings.min_columns,
            settings,
            rects: Vec::new(),
            active: None,
        }
    }

    /// Rebuilds a layout from persisted state. Rectangles that are valid and
    /// do not overlap an earlier one are kept verbatim; the ids of the rest
    /// are returned so the caller can place them again.
    pub fn restore(settings: GridSettings, columns: u32, stored: Vec<Rect>) -> (Self, Vec<String>) {
        let mut layout = Self::new(settings);
        layout.columns = columns.clamp(layout.settings.min_columns, layout.settings.max_columns);

        let mut rejected = Vec::new();
        for rect in stored {
            match layout.validate(&rect, None) {
                Ok(()) if layout.get(&rect.id).is_none() => layout.rects.push(rect),
                Ok(()) => {
                    tracing::debug!("Dropping duplicate stored rectangle {}", rect.id);
                }
                Err(e) => {
                    tracing::debug!("Stored rectangle rejected: {}", e);
                    rejected.push(rect.id);
                }
            }
        }
        layout.grow_columns();
        (layout, rejected)
    }

    pub fn settings(&self) -> &GridSettings {
        &self.settings
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn get(&self, id: &str) -> Option<&Rect> {
        self.rects.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn state(&self, id: &str) -> Option<RectState> {
        self.get(id)?;
        Some(match &self.active {
            Some((active, gesture)) if active == id => gesture.state(),
            _ => RectState::Placed,
        })
    }

    pub fn pixel_box(&self, rect: &Rect) -> PixelBox {
        let margin = u64::from(self.settings.margin);
        let cell_width = u64::from(self.settings.cell_width);
        let cell_height = u64::from(self.settings.cell_height);
        let offset = |cells: u32, cell: u64| {
            margin.saturating_add(u64::from(cells).saturating_mul(cell.saturating_add(margin)))
        };
        let span = |cells: u32, cell: u64| {
            u64::from(cells)
                .saturating_mul(cell)
                .saturating_add(u64::from(cells.saturating_sub(1)).saturating_mul(margin))
        };
        PixelBox {
            left: offset(rect.x, cell_width),
            top: offset(rect.y, cell_height),
            width: span(rect.w, cell_width),
            height: span(rect.h, cell_height),
        }
    }

    fn max_right_edge(&self) -> u32 {
        self.rects.iter().map(Rect::right).max().unwrap_or(0)
    }

    fn is_free(&self, x: u32, y: u32, w: u32, h: u32) -> bool {
        !self.rects.iter().any(|r| r.overlaps_area(x, y, w, h))
    }

    /// Preferred position for a new `w` x `h` rectangle: extend the first row
    /// rightward while it fits, otherwise the first free slot scanning rows
    /// top to bottom, columns left to right. Falls back to `(0, 0)` when the
    /// bounded scan finds nothing.
    pub fn find_optimal_position(&self, w: u32, h: u32) -> (u32, u32) {
        let max_right = self.max_right_edge();
        if max_right + w <= self.columns {
            return (max_right, 0);
        }

        if w <= self.columns {
            for y in 0..self.settings.max_scan_rows {
                for x in 0..=(self.columns - w) {
                    if self.is_free(x, y, w, h) {
                        return (x, y);
                    }
                }
            }
        }
        (0, 0)
    }

    /// Pushes a candidate down from `y` until it no longer overlaps anything.
    fn stack_down(&self, x: u32, mut y: u32, w: u32, h: u32) -> u32 {
        while !self.is_free(x, y, w, h) {
            y = self
                .rects
                .iter()
                .filter(|r| r.overlaps_area(x, y, w, h))
                .map(Rect::bottom)
                .max()
                .unwrap_or(y + 1);
        }
        y
    }

    /// Places a new rectangle at the optimal position and returns it.
    pub fn place(&mut self, id: &str, size: LayoutSize) -> Result<Rect, LayoutError> {
        if self.contains(id) {
            return Err(LayoutError::DuplicateId(id.to_string()));
        }
        if size.w == 0 || size.h == 0 {
            return Err(LayoutError::EmptySize(id.to_string()));
        }
        let w = size.w.min(self.settings.max_columns);
        if w > self.columns {
            self.columns = self
                .settings
                .min_columns
                .max(w + self.settings.column_buffer)
                .min(self.settings.max_columns);
        }

        let (x, y) = self.find_optimal_position(w, size.h);
        let y = self.stack_down(x, y, w, size.h);
        let rect = Rect::new(id, x, y, w, size.h);
        self.rects.push(rect.clone());
        self.grow_columns();
        tracing::debug!("Placed {} at ({}, {}) size {}x{}", id, x, y, w, size.h);
        Ok(rect)
    }

    fn validate(&self, rect: &Rect, ignore: Option<&str>) -> Result<(), LayoutError> {
        if rect.w == 0 || rect.h == 0 {
            return Err(LayoutError::EmptySize(rect.id.clone()));
        }
        if rect.right() > self.settings.max_columns {
            return Err(LayoutError::OutOfBounds {
                id: rect.id.clone(),
                max_columns: self.settings.max_columns,
            });
        }
        if rect.bottom() > self.settings.max_rows {
            return Err(LayoutError::RowLimit {
                id: rect.id.clone(),
                max_rows: self.settings.max_rows,
            });
        }
        if let Some(other) = self
            .rects
            .iter()
            .filter(|r| Some(r.id.as_str()) != ignore)
            .find(|r| r.overlaps(rect))
        {
            return Err(LayoutError::Overlap {
                id: rect.id.clone(),
                other: other.id.clone(),
            });
        }
        Ok(())
    }

    /// Enters the moving or resizing state for `id`. Only one rectangle can
    /// be in a gesture at a time.
    pub fn begin(&mut self, id: &str, gesture: Gesture) -> Result<(), LayoutError> {
        if !self.contains(id) {
            return Err(LayoutError::NotFound(id.to_string()));
        }
        if let Some((busy, active)) = &self.active {
            return Err(LayoutError::Busy {
                id: busy.clone(),
                state: active.state(),
            });
        }
        self.active = Some((id.to_string(), gesture));
        Ok(())
    }

    /// Leaves the gesture, committing `proposal` when it is valid. An invalid
    /// proposal leaves the rectangle at its last placed position and size.
    pub fn finish(&mut self, id: &str, proposal: Proposal) -> Result<Rect, LayoutError> {
        let gesture = match &self.active {
            Some((active, gesture)) if active == id => *gesture,
            _ if self.contains(id) => return Err(LayoutError::NoGesture(id.to_string())),
            _ => return Err(LayoutError::NotFound(id.to_string())),
        };
        self.active = None;

        let current = self
            .get(id)
            .cloned()
            .ok_or_else(|| LayoutError::NotFound(id.to_string()))?;
        let candidate = match (gesture, proposal) {
            (Gesture::Move, Proposal::Position { x, y }) => Rect { x, y, ..current },
            (Gesture::Resize, Proposal::Size { w, h }) => Rect { w, h, ..current },
            (expected, proposal) => {
                return Err(LayoutError::GestureMismatch { expected, proposal });
            }
        };

        self.validate(&candidate, Some(id))?;
        if let Some(slot) = self.rects.iter_mut().find(|r| r.id == id) {
            *slot = candidate.clone();
        }
        self.grow_columns();
        Ok(candidate)
    }

    /// Abandons an in-progress gesture; the rectangle stays where it was.
    pub fn cancel(&mut self, id: &str) {
        if matches!(&self.active, Some((active, _)) if active == id) {
            self.active = None;
        }
    }

    pub fn move_rect(&mut self, id: &str, x: u32, y: u32) -> Result<Rect, LayoutError> {
        self.begin(id, Gesture::Move)?;
        self.finish(id, Proposal::Position { x, y })
    }

    pub fn resize_rect(&mut self, id: &str, w: u32, h: u32) -> Result<Rect, LayoutError> {
        self.begin(id, Gesture::Resize)?;
        self.finish(id, Proposal::Size { w, h })
    }

    pub fn remove(&mut self, id: &str) -> Option<Rect> {
        self.cancel(id);
        let index = self.rects.iter().position(|r| r.id == id)?;
        Some(self.rects.remove(index))
    }

    /// Grows `columns` when a rectangle reaches past it. Never shrinks.
    fn grow_columns(&mut self) {
        let max_right = self.max_right_edge();
        let widest = self.rects.iter().map(|r| r.w).max().unwrap_or(0);
        if max_right <= self.columns && widest <= self.columns {
            return;
        }
        let target = self
            .settings
            .min_columns
            .max(max_right + self.settings.column_buffer)
            .min(self.settings.max_columns);
        if target > self.columns {
            tracing::debug!("Growing grid from {} to {} columns", self.columns, target);
            self.columns = target;
        }
    }

    /// Shrinks the grid back to its minimum width and re-places every
    /// rectangle, in reading order, keeping its size.
    pub fn reset(&mut self) {
        let mut previous = std::mem::take(&mut self.rects);
        previous.sort_by_key(|r| (r.y, r.x));
        self.active = None;
        self.columns = self.settings.min_columns;
        for rect in previous {
            if let Err(e) = self.place(&rect.id, rect.size()) {
                tracing::warn!("Could not re-place {} during reset: {}", rect.id, e);
            }
        }
    }
}
