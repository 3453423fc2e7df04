//! Coordinates already explored during one facility's traversal.

use crate::geo::GeoPoint;

/// Two coordinates closer than this on both axes are the same place.
pub const DEFAULT_EPSILON: f64 = 1e-6;

/// Visited coordinates with tolerance-based membership.
///
/// Repeated projections drift by a few ULPs, so exact float equality would
/// miss revisits.
#[derive(Debug, Clone)]
pub struct VisitedSet {
    points: Vec<GeoPoint>,
    epsilon: f64,
}

impl VisitedSet {
    pub fn new() -> Self {
        Self::with_epsilon(DEFAULT_EPSILON)
    }

    pub fn with_epsilon(epsilon: f64) -> Self {
        Self {
            points: Vec::new(),
            epsilon,
        }
    }

    pub fn contains(&self, point: GeoPoint) -> bool {
        self.points.iter().any(|p| p.approx_eq(&point, self.epsilon))
    }

    /// Returns `false` when an equivalent point was already present.
    pub fn insert(&mut self, point: GeoPoint) -> bool {
        if self.contains(point) {
            return false;
        }
        self.points.push(point);
        true
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl Default for VisitedSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerant_membership() {
        let mut visited = VisitedSet::new();
        let p = GeoPoint { lat: 31.5964, lon: -110.307589 };
        assert!(visited.insert(p));
        assert!(visited.contains(GeoPoint { lat: 31.596_400_4, lon: -110.307_589_3 }));
        assert!(!visited.insert(GeoPoint { lat: 31.596_400_4, lon: -110.307589 }));
        assert_eq!(visited.len(), 1);
    }

    #[test]
    fn test_one_axis_match_is_not_enough() {
        let mut visited = VisitedSet::new();
        visited.insert(GeoPoint { lat: 10.0, lon: 10.0 });
        assert!(!visited.contains(GeoPoint { lat: 10.0, lon: 10.001 }));
        assert!(!visited.contains(GeoPoint { lat: 10.001, lon: 10.0 }));
    }

    #[test]
    fn test_antimeridian_is_one_meridian() {
        let mut visited = VisitedSet::new();
        visited.insert(GeoPoint { lat: 0.0, lon: 180.0 });
        assert!(visited.contains(GeoPoint { lat: 0.0, lon: -180.0 }));
        assert!(visited.contains(GeoPoint { lat: 0.0, lon: -179.999_999_7 }));
        assert!(!visited.contains(GeoPoint { lat: 0.0, lon: 0.0 }));
    }
}
