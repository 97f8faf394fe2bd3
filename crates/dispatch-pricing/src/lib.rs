//! Pure pricing function for spec.md §4.1. No I/O, no side effects: given a
//! trip's distance/duration and its packages, compute `(client_fee,
//! driver_remuneration)` in minor currency units.

use dispatch_types::Package;

const BASE: f64 = 500.0;
const PER_KM: f64 = 150.0;
const PER_MIN: f64 = 0.6;
const WEIGHT_THRESHOLD_G: f64 = 5000.0;
const WEIGHT_SURCHARGE_PER_KG: f64 = 100.0;
const VOLUME_THRESHOLD_M3: f64 = 0.2;
const VOLUME_SURCHARGE: f64 = 500.0;
const FRAGILE_SURCHARGE: f64 = 300.0;

const MIN_DRIVER_REMUNERATION: i64 = 300;
const MIN_CLIENT_FEE: i64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricingResult {
    pub client_fee: i64,
    pub driver_remuneration: i64,
}

/// Rounds half away from zero, matching the "round" used throughout
/// spec.md §4.1's formula (all inputs here are non-negative).
fn round_currency(value: f64) -> i64 {
    value.round() as i64
}

pub fn compute_pricing(distance_meters: f64, duration_seconds: f64, packages: &[Package]) -> PricingResult {
    let km = distance_meters / 1000.0;
    let minutes = duration_seconds / 60.0;
    let mut cost = BASE + km * PER_KM + minutes * PER_MIN;

    let total_weight_g: f64 = packages.iter().map(Package::total_weight_g).sum();
    let total_volume_m3: f64 = packages.iter().map(Package::volume_cubic_meters).sum();
    let any_fragile = packages.iter().any(Package::is_fragile);

    if total_weight_g > WEIGHT_THRESHOLD_G {
        cost += (total_weight_g - WEIGHT_THRESHOLD_G) / 1000.0 * WEIGHT_SURCHARGE_PER_KG;
    }
    if total_volume_m3 > VOLUME_THRESHOLD_M3 {
        cost += VOLUME_SURCHARGE;
    }
    if any_fragile {
        cost += FRAGILE_SURCHARGE;
    }

    let driver_remuneration =
        round_currency(0.5 * BASE + (cost - BASE) * 0.95).max(MIN_DRIVER_REMUNERATION);
    let client_fee = round_currency(cost * 1.05).max(MIN_CLIENT_FEE);

    PricingResult { client_fee, driver_remuneration }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn package(weight_g: f64, fragile: bool) -> Package {
        Package {
            weight_g: Some(weight_g),
            depth_cm: None,
            width_cm: None,
            height_cm: None,
            quantity: 1,
            mention_warning: fragile.then(|| "fragile".to_string()),
        }
    }

    #[test]
    fn scenario_s1_happy_path_pricing() {
        let result = compute_pricing(2000.0, 360.0, &[package(2000.0, false)]);
        assert_eq!(result.client_fee, 844);
        assert_eq!(result.driver_remuneration, 538);
    }

    #[test]
    fn client_fee_and_remuneration_floors_hold() {
        let result = compute_pricing(1.0, 1.0, &[]);
        assert!(result.client_fee >= 500);
        assert!(result.driver_remuneration >= 300);
    }

    #[test]
    fn heavy_package_adds_weight_surcharge_once() {
        let light = compute_pricing(1000.0, 60.0, &[package(4000.0, false)]);
        let heavy = compute_pricing(1000.0, 60.0, &[package(7000.0, false)]);
        // (7000-5000)/1000 * 100 = 200 extra cost pre-multiplier.
        assert!(heavy.client_fee > light.client_fee);
    }

    #[test]
    fn multi_package_fragile_surcharge_applied_exactly_once() {
        let one_fragile = compute_pricing(1000.0, 60.0, &[package(500.0, true), package(500.0, false)]);
        let none_fragile = compute_pricing(1000.0, 60.0, &[package(500.0, false), package(500.0, false)]);
        let both_fragile = compute_pricing(1000.0, 60.0, &[package(500.0, true), package(500.0, true)]);

        let delta_one = one_fragile.client_fee - none_fragile.client_fee;
        let delta_both = both_fragile.client_fee - none_fragile.client_fee;
        // Fragile surcharge (300) scaled by the 1.05 client multiplier,
        // applied once per order, not once per fragile package.
        assert_eq!(delta_one, delta_both);
        assert_eq!(delta_one, round_currency(300.0 * 1.05));
    }

    #[test]
    fn large_volume_adds_surcharge() {
        let small = Package {
            weight_g: Some(100.0),
            depth_cm: Some(10.0),
            width_cm: Some(10.0),
            height_cm: Some(10.0),
            quantity: 1,
            mention_warning: None,
        };
        let large = Package {
            weight_g: Some(100.0),
            depth_cm: Some(100.0),
            width_cm: Some(100.0),
            height_cm: Some(100.0),
            quantity: 1,
            mention_warning: None,
        };
        let small_result = compute_pricing(1000.0, 60.0, &[small]);
        let large_result = compute_pricing(1000.0, 60.0, &[large]);
        assert!(large_result.client_fee > small_result.client_fee);
    }
}
