//! Geographic coordinates and the decoded target pair.

/// Mean Earth radius used by the haversine formulas.
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Latitude/longitude in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoCoordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoCoordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Great-circle distance in metres.
    pub fn distance_to(&self, other: &GeoCoordinate) -> f64 {
        let (phi1, phi2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dphi = phi2 - phi1;
        let dlambda = (other.longitude - self.longitude).to_radians();
        let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
    }

    /// Initial great-circle bearing in degrees, clockwise from north, `[0, 360)`.
    pub fn bearing_to(&self, other: &GeoCoordinate) -> f64 {
        let (phi1, phi2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let dlambda = (other.longitude - self.longitude).to_radians();
        let y = dlambda.sin() * phi2.cos();
        let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
        y.atan2(x).to_degrees().rem_euclid(360.0)
    }

    /// Great-circle midpoint.
    pub fn midpoint(&self, other: &GeoCoordinate) -> GeoCoordinate {
        let (phi1, phi2) = (self.latitude.to_radians(), other.latitude.to_radians());
        let lambda1 = self.longitude.to_radians();
        let dlambda = (other.longitude - self.longitude).to_radians();
        let bx = phi2.cos() * dlambda.cos();
        let by = phi2.cos() * dlambda.sin();
        let phi = (phi1.sin() + phi2.sin()).atan2(((phi1.cos() + bx).powi(2) + by * by).sqrt());
        let lambda = lambda1 + by.atan2(phi1.cos() + bx);
        GeoCoordinate::new(phi.to_degrees(), lambda.to_degrees())
    }
}

/// Two coordinates delivered together over the target link.
///
/// Never mutated; a new pair replaces it only after the mission restarts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetWaypointPair {
    pub first: GeoCoordinate,
    pub second: GeoCoordinate,
}

impl TargetWaypointPair {
    pub fn new(first: GeoCoordinate, second: GeoCoordinate) -> Self {
        Self { first, second }
    }

    /// The point the vehicle steers toward during GPS seek.
    pub fn aim_point(&self) -> GeoCoordinate {
        self.first.midpoint(&self.second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_one_degree_of_latitude() {
        let a = GeoCoordinate::new(10.0, 20.0);
        let b = GeoCoordinate::new(11.0, 20.0);
        assert_relative_eq!(a.distance_to(&b), 111_194.9, epsilon = 1.0);
        assert_relative_eq!(a.bearing_to(&b), 0.0, epsilon = 1e-9);
        assert_relative_eq!(b.bearing_to(&a), 180.0, epsilon = 1e-9);
    }

    #[test]
    fn test_bearing_east() {
        let a = GeoCoordinate::new(0.0, 0.0);
        let b = GeoCoordinate::new(0.0, 1.0);
        assert_relative_eq!(a.bearing_to(&b), 90.0, epsilon = 1e-9);
    }

    #[test]
    fn test_midpoint_is_equidistant() {
        let pair = TargetWaypointPair::new(GeoCoordinate::new(55.67, 12.56), GeoCoordinate::new(55.69, 12.60));
        let m = pair.aim_point();
        assert_relative_eq!(
            m.distance_to(&pair.first),
            m.distance_to(&pair.second),
            epsilon = 1e-6
        );
    }
}
