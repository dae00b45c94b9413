//! Capture size selection

use super::traits::{Resolution, Rotation};

/// Maximum aspect ratio difference for a size to count as matching the preview
const ASPECT_TOLERANCE: f64 = 0.1;

/// Choose the supported size that best fits a preview surface.
///
/// Prefers sizes whose aspect ratio matches the preview (after accounting for
/// rotation) and, among those, the one whose height is closest to the preview
/// height. Falls back to the closest height regardless of ratio.
pub fn choose_optimal_size(
    supported: &[Resolution],
    preview: Resolution,
    rotation: Rotation,
) -> Option<Resolution> {
    // Sensor sizes are landscape; a rotated preview has to be compared transposed
    let target = if rotation.swaps_axes() {
        preview.transposed()
    } else {
        preview
    };
    let target_ratio = target.aspect_ratio();

    let by_height_distance = |size: &&Resolution| size.height.abs_diff(target.height);

    supported
        .iter()
        .filter(|size| (size.aspect_ratio() - target_ratio).abs() <= ASPECT_TOLERANCE)
        .min_by_key(by_height_distance)
        .or_else(|| supported.iter().min_by_key(by_height_distance))
        .copied()
}
