//! Great-circle distance checks against the configured office location.

use attendance_daemon_protocol::LocationFix;

use crate::config::GeofenceConfig;

pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeofenceCheck {
    pub in_range: bool,
    pub distance_meters: f64,
}

/// Haversine distance in meters between two coordinates given in degrees.
pub fn distance_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    // Clamp guards against rounding pushing `a` a hair above 1.
    let c = 2.0 * a.sqrt().min(1.0).asin();
    EARTH_RADIUS_METERS * c
}

/// Classifies `fix` against the office circle. The boundary is inclusive and
/// `remote_override` accepts any distance.
pub fn validate(
    fix: &LocationFix,
    config: &GeofenceConfig,
    remote_override: bool,
) -> GeofenceCheck {
    let distance = distance_meters(
        fix.latitude,
        fix.longitude,
        config.office_latitude,
        config.office_longitude,
    );
    GeofenceCheck {
        in_range: remote_override || distance <= config.radius_meters,
        distance_meters: distance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendance_daemon_protocol::LocationSource;

    fn fix(latitude: f64, longitude: f64) -> LocationFix {
        LocationFix {
            latitude,
            longitude,
            accuracy_meters: 10.0,
            source: LocationSource::DeviceHighAccuracy,
            captured_at: "2026-03-09T09:00:00Z".to_string(),
        }
    }

    fn office() -> GeofenceConfig {
        GeofenceConfig {
            office_latitude: 19.160122,
            office_longitude: 72.839720,
            radius_meters: 2000.0,
        }
    }

    #[test]
    fn distance_to_self_is_zero() {
        let cfg = office();
        let d = distance_meters(
            cfg.office_latitude,
            cfg.office_longitude,
            cfg.office_latitude,
            cfg.office_longitude,
        );
        assert_eq!(d, 0.0);
    }

    #[test]
    fn distance_is_deterministic_and_symmetric() {
        let a = distance_meters(19.16, 72.83, 19.20, 72.90);
        let b = distance_meters(19.16, 72.83, 19.20, 72.90);
        let c = distance_meters(19.20, 72.90, 19.16, 72.83);
        assert_eq!(a, b);
        assert!((a - c).abs() < 1e-6);
    }

    #[test]
    fn nearby_fix_is_in_range() {
        let check = validate(&fix(19.160122, 72.858000), &office(), false);
        assert!(check.in_range);
        assert!(check.distance_meters > 1800.0 && check.distance_meters < 2000.0);
    }

    #[test]
    fn distant_fix_is_out_of_range() {
        let check = validate(&fix(19.20, 72.90), &office(), false);
        assert!(!check.in_range);
        assert!(check.distance_meters > 7000.0);
    }

    #[test]
    fn boundary_is_inclusive() {
        let sample = fix(19.170000, 72.845000);
        let cfg = office();
        let exact = validate(&sample, &cfg, false).distance_meters;

        let at_radius = GeofenceConfig {
            radius_meters: exact,
            ..cfg.clone()
        };
        assert!(validate(&sample, &at_radius, false).in_range);

        let one_meter_short = GeofenceConfig {
            radius_meters: exact - 1.0,
            ..cfg
        };
        assert!(!validate(&sample, &one_meter_short, false).in_range);
    }

    #[test]
    fn remote_override_accepts_any_distance() {
        let check = validate(&fix(28.6139, 77.2090), &office(), true);
        assert!(check.in_range);
        assert!(check.distance_meters > 1_000_000.0);
    }
}
