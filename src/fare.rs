//! Fare window calculator: distance + time-of-day + demand/supply/weather
//! signals reduced to a base fare, bid window and ETA estimate. Pure and
//! deterministic — no I/O, no clock reads beyond the timestamp passed in.

use chrono::{DateTime, Timelike, Utc};

use crate::error::{DispatchError, DispatchResult};
use crate::model::round2;

const BASE_PICKUP_FEE: f64 = 2.25;
const PER_KM_RATE: f64 = 0.95;
const MIN_BASE_FARE: f64 = 3.25;
const MAX_BASE_FARE: f64 = 35.00;
const EARTH_RADIUS_KM: f64 = 6371.0;
const PRICING_VERSION: &str = "v1";

#[derive(Debug, Clone, Copy)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IncentiveMetrics {
    pub demand_index: f64,
    pub supply_index: f64,
    pub weather_severity: f64,
}

impl IncentiveMetrics {
    pub fn neutral() -> Self {
        Self {
            demand_index: 1.0,
            supply_index: 1.0,
            weather_severity: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FareRequest {
    pub distance_km: Option<f64>,
    pub pickup: Option<GeoPoint>,
    pub dropoff: Option<GeoPoint>,
    pub at: DateTime<Utc>,
    pub incentives: IncentiveMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceSource {
    InputDistance,
    Haversine,
}

#[derive(Debug, Clone)]
pub struct FareBreakdown {
    pub distance_km: f64,
    pub distance_source: DistanceSource,
    pub base_pickup_fee: f64,
    pub distance_component: f64,
    pub time_multiplier: f64,
    pub peak_multiplier: f64,
    pub incentive_multiplier: f64,
    pub pricing_version: &'static str,
}

#[derive(Debug, Clone)]
pub struct FareRecommendation {
    pub base_fare: f64,
    pub max_bid_limit: f64,
    pub eta_estimate_minutes: u32,
    pub breakdown: FareBreakdown,
}

fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

fn haversine_km(a: GeoPoint, b: GeoPoint) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().asin()
}

/// Resolves the distance to use: the caller-supplied value if present,
/// otherwise haversine between pickup and dropoff. Mirrors the original
/// system's `resolve_distance_km`: haversine requires both endpoints.
fn resolve_distance_km(req: &FareRequest) -> DispatchResult<(f64, DistanceSource)> {
    if let Some(d) = req.distance_km {
        return Ok((d, DistanceSource::InputDistance));
    }
    match (req.pickup, req.dropoff) {
        (Some(p), Some(d)) => Ok((haversine_km(p, d), DistanceSource::Haversine)),
        _ => Err(DispatchError::invalid(
            "distance_km not provided and pickup/dropoff coordinates are incomplete",
        )),
    }
}

fn time_of_day_multiplier(hour: u32) -> f64 {
    match hour {
        0..=5 => 1.12,
        6..=10 => 1.00,
        11..=13 => 1.08,
        14..=16 => 0.97,
        17..=21 => 1.12,
        _ => 1.05,
    }
}

fn peak_hour_multiplier(hour: u32) -> bool {
    (11..14).contains(&hour) || (18..22).contains(&hour)
}

fn incentive_multiplier(m: &IncentiveMetrics) -> f64 {
    let supply = m.supply_index.max(0.1);
    let pressure = clamp((m.demand_index / supply - 1.0) * 0.25, -0.20, 0.40);
    let raw = 1.0 + pressure + 0.15 * m.weather_severity;
    let rounded = (clamp(raw, 0.80, 1.60) * 1000.0).round() / 1000.0;
    rounded
}

fn estimate_eta_minutes(distance_km: f64, peak: bool, weather_severity: f64) -> u32 {
    let peak_penalty = if peak { 0.90 } else { 1.0 };
    let weather_penalty = 1.0 - 0.25 * weather_severity;
    let effective_speed = (28.0 * peak_penalty * weather_penalty).max(8.0);
    let travel_minutes = distance_km / effective_speed * 60.0;
    let eta = (travel_minutes + 8.0).ceil() as i64;
    eta.max(10) as u32
}

/// Produces the base fare, bid window bound (`1.5x`) and ETA for an order.
pub fn recommend_fare(req: &FareRequest) -> DispatchResult<FareRecommendation> {
    let (distance_km, distance_source) = resolve_distance_km(req)?;
    let hour = req.at.hour();
    let peak = peak_hour_multiplier(hour);

    let time_multiplier = time_of_day_multiplier(hour);
    let peak_multiplier = if peak { 1.12 } else { 1.00 };
    let incentive_multiplier = incentive_multiplier(&req.incentives);

    let distance_component = distance_km * PER_KM_RATE;
    let raw = (BASE_PICKUP_FEE + distance_component) * time_multiplier * peak_multiplier * incentive_multiplier;
    let base_fare = round2(clamp(raw, MIN_BASE_FARE, MAX_BASE_FARE));

    let eta_estimate_minutes =
        estimate_eta_minutes(distance_km, peak, req.incentives.weather_severity);

    Ok(FareRecommendation {
        base_fare,
        max_bid_limit: round2(base_fare * 1.5),
        eta_estimate_minutes,
        breakdown: FareBreakdown {
            distance_km,
            distance_source,
            base_pickup_fee: BASE_PICKUP_FEE,
            distance_component,
            time_multiplier,
            peak_multiplier,
            incentive_multiplier,
            pricing_version: PRICING_VERSION,
        },
    })
}

/// The only legal bid range for an order, derived from its stored base fare.
pub fn bid_window(base_fare: f64) -> (f64, f64) {
    (round2(base_fare), round2(base_fare * 1.5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, hour, 0, 0).unwrap()
    }

    #[test]
    fn base_fare_clamped_to_floor() {
        let req = FareRequest {
            distance_km: Some(0.0),
            pickup: None,
            dropoff: None,
            at: at(8),
            incentives: IncentiveMetrics::neutral(),
        };
        let rec = recommend_fare(&req).unwrap();
        assert!(rec.base_fare >= 3.25);
    }

    #[test]
    fn bid_window_is_1_5x_base_fare() {
        let (min, max) = bid_window(10.0);
        assert_eq!(min, 10.0);
        assert_eq!(max, 15.0);
    }

    #[test]
    fn missing_distance_without_coords_is_invalid() {
        let req = FareRequest {
            distance_km: None,
            pickup: Some(GeoPoint { lat: 1.0, lng: 1.0 }),
            dropoff: None,
            at: at(8),
            incentives: IncentiveMetrics::neutral(),
        };
        assert!(recommend_fare(&req).is_err());
    }

    #[test]
    fn haversine_is_symmetric() {
        let a = GeoPoint { lat: 40.0, lng: -73.9 };
        let b = GeoPoint { lat: 40.7, lng: -74.2 };
        assert!((haversine_km(a, b) - haversine_km(b, a)).abs() < 1e-6);
    }

    #[test]
    fn peak_hour_adds_surcharge() {
        let req_off = FareRequest {
            distance_km: Some(5.0),
            pickup: None,
            dropoff: None,
            at: at(9),
            incentives: IncentiveMetrics::neutral(),
        };
        let req_peak = FareRequest { at: at(12), ..req_off };
        let off = recommend_fare(&req_off).unwrap();
        let peak = recommend_fare(&req_peak).unwrap();
        assert!(peak.base_fare > off.base_fare);
    }

    #[test]
    fn eta_has_floor_of_ten_minutes() {
        let req = FareRequest {
            distance_km: Some(0.1),
            pickup: None,
            dropoff: None,
            at: at(9),
            incentives: IncentiveMetrics::neutral(),
        };
        assert_eq!(recommend_fare(&req).unwrap().eta_estimate_minutes, 10);
    }

    #[cfg(test)]
    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(1000))]

            #[test]
            fn fare_is_idempotent(distance in 0.0f64..200.0, demand in 0.5f64..2.0, supply in 0.5f64..2.0, weather in 0.0f64..1.0, hour in 0u32..24) {
                let req = FareRequest {
                    distance_km: Some(distance),
                    pickup: None,
                    dropoff: None,
                    at: at(hour),
                    incentives: IncentiveMetrics { demand_index: demand, supply_index: supply, weather_severity: weather },
                };
                let a = recommend_fare(&req).unwrap();
                let b = recommend_fare(&req).unwrap();
                prop_assert_eq!(a.base_fare, b.base_fare);
                prop_assert_eq!(a.eta_estimate_minutes, b.eta_estimate_minutes);
            }

            #[test]
            fn base_fare_always_in_bounds(distance in 0.0f64..500.0, demand in 0.5f64..2.0, supply in 0.5f64..2.0, weather in 0.0f64..1.0, hour in 0u32..24) {
                let req = FareRequest {
                    distance_km: Some(distance),
                    pickup: None,
                    dropoff: None,
                    at: at(hour),
                    incentives: IncentiveMetrics { demand_index: demand, supply_index: supply, weather_severity: weather },
                };
                let rec = recommend_fare(&req).unwrap();
                prop_assert!(rec.base_fare >= 3.25 && rec.base_fare <= 35.00);
            }

            #[test]
            fn haversine_symmetric_prop(lat1 in -85.0f64..85.0, lng1 in -179.0f64..179.0, lat2 in -85.0f64..85.0, lng2 in -179.0f64..179.0) {
                let a = GeoPoint { lat: lat1, lng: lng1 };
                let b = GeoPoint { lat: lat2, lng: lng2 };
                prop_assert!((haversine_km(a, b) - haversine_km(b, a)).abs() < 1e-6);
            }
        }
    }
}
