/// Row range to materialize plus the pixel padding that stands in for the
/// rows left out above and below it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VirtualWindow {
    pub start: usize,
    /// Exclusive.
    pub end: usize,
    pub pad_top: f64,
    pub pad_bottom: f64,
}

impl VirtualWindow {
    #[must_use]
    pub fn full(total: usize) -> Self {
        Self {
            start: 0,
            end: total,
            pad_top: 0.0,
            pad_bottom: 0.0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Rows inside the window, clamped to what `rows` actually holds.
    #[must_use]
    pub fn slice<'a, T>(&self, rows: &'a [T]) -> &'a [T] {
        let end = self.end.min(rows.len());
        let start = self.start.min(end);
        &rows[start..end]
    }
}

#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn compute_virtual_window(
    total: usize,
    row_height: f64,
    scroll_offset: f64,
    viewport_height: f64,
    overscan: usize,
) -> VirtualWindow {
    if row_height.is_nan() || row_height <= 0.0 {
        return VirtualWindow::full(total);
    }

    let visible_count = (viewport_height.max(0.0) / row_height).ceil() as usize;
    let first_visible = (scroll_offset.max(0.0) / row_height).floor() as usize;

    let start = first_visible.saturating_sub(overscan).min(total);
    let end = start
        .saturating_add(visible_count)
        .saturating_add(overscan.saturating_mul(2))
        .min(total);

    VirtualWindow {
        start,
        end,
        pad_top: start as f64 * row_height,
        pad_bottom: (total - end) as f64 * row_height,
    }
}

/// Holds the latest scroll inputs and recomputes the window on every change.
///
/// Scroll, resize and row-count updates all go through here so the window
/// can never point past the current row count.
#[derive(Debug, Clone)]
pub struct VirtualScroller {
    total: usize,
    row_height: f64,
    overscan: usize,
    scroll_offset: f64,
    viewport_height: f64,
    window: VirtualWindow,
}

impl VirtualScroller {
    #[must_use]
    pub fn new(row_height: f64, overscan: usize) -> Self {
        Self {
            total: 0,
            row_height,
            overscan,
            scroll_offset: 0.0,
            viewport_height: 0.0,
            window: VirtualWindow::full(0),
        }
    }

    #[must_use]
    pub fn window(&self) -> VirtualWindow {
        self.window
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    #[must_use]
    pub fn scroll_offset(&self) -> f64 {
        self.scroll_offset
    }

    pub fn scroll_to(&mut self, scroll_offset: f64) -> VirtualWindow {
        self.scroll_offset = scroll_offset;
        self.recompute()
    }

    pub fn resize(&mut self, viewport_height: f64) -> VirtualWindow {
        self.viewport_height = viewport_height;
        self.recompute()
    }

    pub fn set_total(&mut self, total: usize) -> VirtualWindow {
        self.total = total;
        self.recompute()
    }

    /// Back to the top, used when a different row set replaces the current one.
    pub fn reset(&mut self, total: usize) -> VirtualWindow {
        self.scroll_offset = 0.0;
        self.set_total(total)
    }

    fn recompute(&mut self) -> VirtualWindow {
        self.window = compute_virtual_window(
            self.total,
            self.row_height,
            self.scroll_offset,
            self.viewport_height,
            self.overscan,
        );
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::{compute_virtual_window, VirtualScroller, VirtualWindow};

    #[test]
    fn window_around_scroll_position_includes_overscan() {
        let window = compute_virtual_window(1000, 20.0, 200.0, 200.0, 2);

        assert!((8..=10).contains(&window.start));
        assert!(window.end > window.start);
        assert!((window.pad_top - window.start as f64 * 20.0).abs() < f64::EPSILON);
        assert_eq!(window.start, 8);
        assert_eq!(window.end, 22);
        assert!((window.pad_bottom - 978.0 * 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_row_height_disables_virtualization() {
        let window = compute_virtual_window(37, 0.0, 500.0, 200.0, 3);
        assert_eq!(window, VirtualWindow::full(37));
        assert!(window.pad_top.abs() < f64::EPSILON);
        assert!(window.pad_bottom.abs() < f64::EPSILON);
    }

    #[test]
    fn window_is_clamped_at_both_ends() {
        let top = compute_virtual_window(100, 10.0, -50.0, 100.0, 5);
        assert_eq!(top.start, 0);
        assert_eq!(top.end, 20);

        let past_end = compute_virtual_window(100, 10.0, 5_000.0, 100.0, 5);
        assert!(past_end.start <= past_end.end);
        assert_eq!(past_end.end, 100);
        assert!(past_end.pad_bottom.abs() < f64::EPSILON);

        let empty = compute_virtual_window(0, 10.0, 0.0, 100.0, 5);
        assert!(empty.is_empty());
    }

    #[test]
    fn slice_never_reads_past_loaded_rows() {
        let rows = (0..5).collect::<Vec<_>>();
        let window = VirtualWindow {
            start: 3,
            end: 9,
            pad_top: 0.0,
            pad_bottom: 0.0,
        };
        assert_eq!(window.slice(&rows), &[3, 4]);
    }

    #[test]
    fn scroller_recomputes_on_every_input() {
        let mut scroller = VirtualScroller::new(20.0, 2);
        scroller.resize(200.0);
        let window = scroller.set_total(1000);
        assert_eq!((window.start, window.end), (0, 14));

        let window = scroller.scroll_to(200.0);
        assert_eq!((window.start, window.end), (8, 22));

        let window = scroller.set_total(15);
        assert!(window.end <= 15);
        assert!(window.start <= window.end);

        let window = scroller.reset(1000);
        assert_eq!(window.start, 0);
        assert!(scroller.scroll_offset().abs() < f64::EPSILON);
    }
}
