/// Distance from the bottom, in display units, within which new messages are followed.
pub const SCROLL_FOLLOW_THRESHOLD: f32 = 150.0;

/// Last viewport geometry reported by the rendering layer.
///
/// `offset` grows downward from the top of the content.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub offset: f32,
    pub viewport_height: f32,
    pub content_height: f32,
}

impl Viewport {
    pub fn new(offset: f32, viewport_height: f32, content_height: f32) -> Self {
        Self {
            offset,
            viewport_height,
            content_height,
        }
    }

    /// Remaining scrollable distance below the visible area.
    pub fn distance_from_bottom(&self) -> f32 {
        (self.content_height - (self.offset + self.viewport_height)).max(0.0)
    }

    fn content_fits(&self) -> bool {
        self.content_height <= self.viewport_height
    }
}

/// Decides whether a reconciliation pass should scroll to the newest message.
///
/// Proximity is sampled before the pass so content growth from the pass itself
/// never pushes an attentive reader out of follow mode.
#[derive(Debug, Clone)]
pub struct ScrollFollow {
    threshold: f32,
    viewport: Viewport,
    pending_scroll_to_bottom: bool,
    near_bottom_before_pass: Option<bool>,
}

impl ScrollFollow {
    pub fn new() -> Self {
        Self::with_threshold(SCROLL_FOLLOW_THRESHOLD)
    }

    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            threshold: threshold.max(0.0),
            viewport: Viewport::default(),
            pending_scroll_to_bottom: false,
            near_bottom_before_pass: None,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn update_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    pub fn is_near_bottom(&self) -> bool {
        self.viewport.content_fits() || self.viewport.distance_from_bottom() <= self.threshold
    }

    /// Forces the next finished pass to scroll regardless of position.
    pub fn request_scroll_to_bottom(&mut self) {
        self.pending_scroll_to_bottom = true;
    }

    pub fn reset(&mut self) {
        self.viewport = Viewport::default();
        self.pending_scroll_to_bottom = false;
        self.near_bottom_before_pass = None;
    }

    /// Samples proximity ahead of a reconciliation pass.
    pub fn begin_pass(&mut self) {
        self.near_bottom_before_pass = Some(self.is_near_bottom());
    }

    /// Returns true when the view should jump to the newest message.
    pub fn finish_pass(&mut self, changed: bool) -> bool {
        let was_near_bottom = self
            .near_bottom_before_pass
            .take()
            .unwrap_or_else(|| self.is_near_bottom());
        let should_scroll = self.pending_scroll_to_bottom || (changed && was_near_bottom);
        self.pending_scroll_to_bottom = false;
        should_scroll
    }
}

impl Default for ScrollFollow {
    fn default() -> Self {
        Self::new()
    }
}
