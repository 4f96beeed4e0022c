//! Monitor descriptors and topology resolution.
//!
//! Monitor handles are session-local, so a workspace never reuses the snapshot's
//! monitor list verbatim. Launch code re-identifies the live topology and maps each
//! recorded ordinal onto it, falling back to the primary monitor when the recorded
//! one is gone.

use crate::Rect;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// DPI value Windows treats as 100% scaling.
pub const BASE_DPI: u32 = 96;

/// A display as seen at snapshot or launch time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Monitor {
    /// OS handle (HMONITOR); only meaningful within the session that produced it.
    #[serde(skip)]
    pub handle: u64,
    /// Hardware identifier that survives reboots.
    pub stable_id: String,
    /// Device instance identifier.
    pub instance_id: String,
    /// 1-based number in enumeration order.
    pub ordinal: u32,
    /// Effective DPI.
    pub dpi: u32,
    #[serde(default)]
    pub is_primary: bool,
    /// Bounds in physical pixels.
    pub rect_dpi_aware: Rect,
    /// Bounds in logical (96 DPI) pixels.
    pub rect_dpi_unaware: Rect,
}

impl PartialEq for Monitor {
    fn eq(&self, other: &Self) -> bool {
        self.stable_id == other.stable_id
            && self.rect_dpi_aware == other.rect_dpi_aware
            && self.rect_dpi_unaware == other.rect_dpi_unaware
    }
}

impl Monitor {
    /// Build a descriptor from physical bounds; the DPI-unaware rectangle is derived.
    /// The ordinal is left at zero until [`assign_ordinals`] runs.
    pub fn new(
        handle: u64,
        stable_id: impl Into<String>,
        instance_id: impl Into<String>,
        dpi: u32,
        is_primary: bool,
        rect_dpi_aware: Rect,
    ) -> Self {
        let dpi = if dpi == 0 { BASE_DPI } else { dpi };
        Self {
            handle,
            stable_id: stable_id.into(),
            instance_id: instance_id.into(),
            ordinal: 0,
            dpi,
            is_primary,
            rect_dpi_aware,
            rect_dpi_unaware: scale_rect(&rect_dpi_aware, f64::from(BASE_DPI) / f64::from(dpi)),
        }
    }

    /// Scale factor relative to 96 DPI.
    pub fn scale(&self) -> f64 {
        f64::from(self.dpi) / f64::from(BASE_DPI)
    }
}

/// Number monitors 1..=n in the order they were enumerated.
pub fn assign_ordinals(monitors: &mut [Monitor]) {
    for (index, monitor) in monitors.iter_mut().enumerate() {
        monitor.ordinal = index as u32 + 1;
    }
}

/// Policy for re-querying the monitor set while the OS reports none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 100,
            interval: Duration::from_millis(30),
        }
    }
}

/// Enumerate monitors, retrying while the enumeration comes back empty.
///
/// Zero monitors is a known transient state right after boot or resume. After
/// `max_attempts` the last (possibly empty) result is returned. Ordinals are
/// assigned in enumeration order, so a fixed topology always yields the same set.
pub fn identify_with_retry<F>(policy: &RetryPolicy, mut enumerate: F) -> Vec<Monitor>
where
    F: FnMut() -> Vec<Monitor>,
{
    let attempts = policy.max_attempts.max(1);
    for attempt in 1..=attempts {
        let mut monitors = enumerate();
        if !monitors.is_empty() {
            assign_ordinals(&mut monitors);
            if attempt > 1 {
                debug!("Monitors became available after {} attempts", attempt);
            }
            return monitors;
        }
        if attempt < attempts {
            std::thread::sleep(policy.interval);
        }
    }
    warn!("No monitors reported after {} attempts", attempts);
    Vec::new()
}

/// Find a monitor by its ordinal.
pub fn find_by_ordinal(monitors: &[Monitor], ordinal: u32) -> Option<&Monitor> {
    monitors.iter().find(|m| m.ordinal == ordinal)
}

/// The primary monitor, or the first one if none is flagged primary.
pub fn primary(monitors: &[Monitor]) -> Option<&Monitor> {
    monitors.iter().find(|m| m.is_primary).or_else(|| monitors.first())
}

/// Monitor a window should be attributed to: the one containing its centre,
/// else the one it overlaps most, else the primary.
pub fn monitor_for_rect<'a>(monitors: &'a [Monitor], rect: &Rect) -> Option<&'a Monitor> {
    let (cx, cy) = rect.center();
    if let Some(m) = monitors.iter().find(|m| m.rect_dpi_aware.contains_point(cx, cy)) {
        return Some(m);
    }
    monitors
        .iter()
        .map(|m| (m.rect_dpi_aware.intersection_area(rect), m))
        .filter(|(area, _)| *area > 0)
        .max_by_key(|(area, _)| *area)
        .map(|(_, m)| m)
        .or_else(|| primary(monitors))
}

/// Resolution of a recorded ordinal against the live topology.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetMonitor {
    pub monitor: Monitor,
    /// The live topology does not match what was recorded for this ordinal.
    pub setup_differs: bool,
}

/// Map a recorded monitor ordinal onto the current monitor set.
///
/// Returns `None` only when `current` is empty.
pub fn resolve_target(current: &[Monitor], recorded: &[Monitor], ordinal: u32) -> Option<TargetMonitor> {
    if let Some(monitor) = find_by_ordinal(current, ordinal) {
        let setup_differs = find_by_ordinal(recorded, ordinal) != Some(monitor);
        return Some(TargetMonitor {
            monitor: monitor.clone(),
            setup_differs,
        });
    }
    primary(current).map(|monitor| TargetMonitor {
        monitor: monitor.clone(),
        setup_differs: true,
    })
}

/// Translate a recorded window position into the target monitor's space.
///
/// An unchanged monitor keeps the position verbatim. Otherwise the offset from the
/// source monitor's origin and the size are scaled by the DPI ratio, re-based on the
/// target origin and clamped into the target bounds.
pub fn translate_position(position: &Rect, source: Option<&Monitor>, target: &Monitor) -> Rect {
    match source {
        Some(source) if source == target && source.dpi == target.dpi => *position,
        Some(source) => {
            let ratio = f64::from(target.dpi) / f64::from(source.dpi.max(1));
            let rel_x = f64::from(position.x - source.rect_dpi_aware.x) * ratio;
            let rel_y = f64::from(position.y - source.rect_dpi_aware.y) * ratio;
            Rect::new(
                target.rect_dpi_aware.x + rel_x.round() as i32,
                target.rect_dpi_aware.y + rel_y.round() as i32,
                (f64::from(position.width) * ratio).round() as i32,
                (f64::from(position.height) * ratio).round() as i32,
            )
            .clamp_into(&target.rect_dpi_aware)
        }
        None => {
            let (cx, cy) = position.center();
            if target.rect_dpi_aware.contains_point(cx, cy) {
                *position
            } else {
                position.clamp_into(&target.rect_dpi_aware)
            }
        }
    }
}

fn scale_rect(rect: &Rect, factor: f64) -> Rect {
    Rect::new(
        (f64::from(rect.x) * factor).round() as i32,
        (f64::from(rect.y) * factor).round() as i32,
        (f64::from(rect.width) * factor).round() as i32,
        (f64::from(rect.height) * factor).round() as i32,
    )
}
