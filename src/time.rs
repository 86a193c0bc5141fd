use chrono::{Duration, NaiveTime};

/// `time(miles, origin, pause_seconds) = origin + (miles / mph) * 3600 + pause_seconds`.
///
/// `miles <= 0` is a no-op.
pub fn time_at(miles: f64, origin: NaiveTime, pause_seconds: i64, mph: f64) -> NaiveTime {
    if miles <= 0.0 {
        return origin;
    }
    let travel_millis = ((miles / mph) * 3_600_000.0).round() as i64;
    origin + Duration::milliseconds(travel_millis) + Duration::seconds(pause_seconds)
}

/// `miles(start, end) = (end - start) / 3600 * mph` when `end >= start`, else 0.
pub fn miles_between(start: NaiveTime, end: NaiveTime, mph: f64) -> f64 {
    if end < start {
        return 0.0;
    }
    let seconds = (end - start).num_seconds() as f64;
    (seconds / 3600.0) * mph
}

#[cfg(test)]
mod tests {
    use super::*;

    const MPH: f64 = 18.0;

    #[test]
    fn round_trips_through_miles_and_back() {
        let origin = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        let target = time_at(9.0, origin, 0, MPH);
        let miles = miles_between(origin, target, MPH);
        assert!((miles - 9.0).abs() < 1e-6);
        let back = time_at(miles, origin, 0, MPH);
        assert_eq!(back, target);
    }

    #[test]
    fn zero_or_negative_miles_is_identity() {
        let origin = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        assert_eq!(time_at(0.0, origin, 0, MPH), origin);
        assert_eq!(time_at(-3.0, origin, 0, MPH), origin);
    }

    #[test]
    fn end_before_start_yields_zero_miles() {
        let start = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let end = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        assert_eq!(miles_between(start, end, MPH), 0.0);
    }
}
