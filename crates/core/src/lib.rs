//! Workspaces Core
//!
//! Platform-agnostic building blocks for launching a saved workspace.
//!
//! This crate holds everything that can be reasoned about without touching the OS:
//! - The persisted workspace model (monitors and application launch records)
//! - Monitor resolution against the live topology and coordinate translation
//! - The per-application launch state machine and its thread-safe tracker
//! - The window-to-launch-record matcher
//! - JSON persistence and TOML configuration

pub mod config;
pub mod matching;
pub mod monitor;
pub mod status;
pub mod store;
pub mod workspace;

use serde::{Deserialize, Serialize};

pub use matching::{find_match, find_process_match, MatchCandidate};
pub use monitor::{Monitor, RetryPolicy, TargetMonitor};
pub use status::{AppId, LaunchReport, LaunchStatusEntry, LaunchingState, LaunchingStatus};
pub use store::{JsonWorkspaceStore, StoreError, WorkspaceStore};
pub use workspace::{ApplicationRecord, Workspace};

/// Identifier for a top-level window.
/// On Windows this is the HWND cast to u64.
pub type WindowHandle = u64;

/// A rectangle in screen coordinates (pixels).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    /// Create a new rectangle.
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Check if this rectangle intersects with another.
    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.x + other.width
            && self.x + self.width > other.x
            && self.y < other.y + other.height
            && self.y + self.height > other.y
    }

    /// Area of the overlap with another rectangle, zero if they are disjoint.
    pub fn intersection_area(&self, other: &Rect) -> i64 {
        if !self.intersects(other) {
            return 0;
        }
        let w = self.right().min(other.right()) - self.x.max(other.x);
        let h = self.bottom().min(other.bottom()) - self.y.max(other.y);
        i64::from(w) * i64::from(h)
    }

    /// Whether the point lies inside this rectangle (right/bottom edges exclusive).
    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Center point of the rectangle.
    pub fn center(&self) -> (i32, i32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    /// Get the right edge x-coordinate.
    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    /// Get the bottom edge y-coordinate.
    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    /// Shrink and shift this rectangle so it lies entirely within `bounds`.
    pub fn clamp_into(&self, bounds: &Rect) -> Rect {
        if bounds.width <= 0 || bounds.height <= 0 {
            return *self;
        }
        let width = self.width.min(bounds.width).max(0);
        let height = self.height.min(bounds.height).max(0);
        let x = self.x.clamp(bounds.x, bounds.right() - width);
        let y = self.y.clamp(bounds.y, bounds.bottom() - height);
        Rect::new(x, y, width, height)
    }
}

/// Current time as seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    match std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
        Ok(d) => d.as_secs() as i64,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_intersection_area() {
        let a = Rect::new(0, 0, 100, 100);
        let b = Rect::new(50, 50, 100, 100);
        assert_eq!(a.intersection_area(&b), 2500);
        assert_eq!(a.intersection_area(&Rect::new(200, 0, 10, 10)), 0);
    }

    #[test]
    fn test_rect_contains_point_edges() {
        let r = Rect::new(0, 0, 1920, 1080);
        assert!(r.contains_point(0, 0));
        assert!(r.contains_point(1919, 1079));
        assert!(!r.contains_point(1920, 500));
    }

    #[test]
    fn test_clamp_into_shifts_and_shrinks() {
        let bounds = Rect::new(1920, 0, 1280, 1024);
        let clamped = Rect::new(3000, -50, 800, 600).clamp_into(&bounds);
        assert_eq!(clamped, Rect::new(2400, 0, 800, 600));

        let oversized = Rect::new(0, 0, 4000, 3000).clamp_into(&bounds);
        assert_eq!(oversized, bounds);
    }
}
