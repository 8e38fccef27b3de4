/*
 * src/utils.rs
 *
 * Purpose: Small geometry helpers shared by the pickup, combat and dropped item modules.
 *
 * Note: The world is laid out on the x/y plane. The z axis is elevation and is
 *       never part of a reach or range check.
 */

/// Calculates the squared distance between two 2D points.
#[inline]
pub fn get_distance_squared(x1: f32, y1: f32, x2: f32, y2: f32) -> f32 {
    let dx = x1 - x2;
    let dy = y1 - y2;
    dx * dx + dy * dy
}

/// Planar distance between two points, ignoring elevation.
#[inline]
pub fn planar_distance(x1: f32, y1: f32, x2: f32, y2: f32) -> f32 {
    get_distance_squared(x1, y1, x2, y2).sqrt()
}

/// Returns true when (x2, y2) lies within `max_distance` of (x1, y1). The boundary is inclusive.
pub fn is_within_planar_distance(x1: f32, y1: f32, x2: f32, y2: f32, max_distance: f32) -> bool {
    planar_distance(x1, y1, x2, y2) <= max_distance
}
