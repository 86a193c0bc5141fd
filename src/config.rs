use chrono::NaiveTime;

/// Typed bundle of the tunables the planner and simulator share. Passed by
/// reference into both instead of being read from statics, so a caller can
/// run several configurations (e.g. in tests) without global state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    pub num_delivery_trucks: u32,
    pub num_drivers: u32,
    pub num_truck_capacity: u32,
    pub delivery_truck_mph: f64,
    pub standard_package_arrival_time: NaiveTime,
    pub standard_package_load_start_time: NaiveTime,
    pub delivery_dispatch_time: NaiveTime,
    pub delivery_return_time: NaiveTime,
    pub package_load_speed_max_seconds: u32,
    pub hub_return_insertion_allowance: f64,
    pub fill_in_insertion_allowance: f64,
    pub closest_neighbor_minimum: usize,
    pub package_address_change_time: NaiveTime,
    /// The corrected address a pending `AddressUpdate` re-homes a package to
    /// once its address-change event fires.
    pub package_corrected_address: String,
    /// CLI refresh speed divisor, 1-9; stored as `speed * 100`.
    pub ui_speed: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            num_delivery_trucks: 3,
            num_drivers: 2,
            num_truck_capacity: 16,
            delivery_truck_mph: 18.0,
            standard_package_arrival_time: NaiveTime::from_hms_opt(4, 0, 0).unwrap(),
            standard_package_load_start_time: NaiveTime::from_hms_opt(6, 30, 0).unwrap(),
            delivery_dispatch_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            delivery_return_time: NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            package_load_speed_max_seconds: 100,
            hub_return_insertion_allowance: 2.5,
            fill_in_insertion_allowance: 3.0,
            closest_neighbor_minimum: 8,
            package_address_change_time: NaiveTime::from_hms_opt(10, 20, 0).unwrap(),
            package_corrected_address: "410 S State St., Salt Lake City, UT 84111".to_string(),
            ui_speed: 100,
        }
    }
}

impl Config {
    /// `time(miles, origin, pause_seconds)`
    pub fn time_at(&self, miles: f64, origin: NaiveTime, pause_seconds: i64) -> NaiveTime {
        crate::time::time_at(miles, origin, pause_seconds, self.delivery_truck_mph)
    }

    /// `miles(start, end)`
    pub fn miles_between(&self, start: NaiveTime, end: NaiveTime) -> f64 {
        crate::time::miles_between(start, end, self.delivery_truck_mph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_calibration_corpus() {
        let cfg = Config::default();
        assert_eq!(cfg.num_delivery_trucks, 3);
        assert_eq!(cfg.num_truck_capacity, 16);
        assert_eq!(cfg.delivery_truck_mph, 18.0);
        assert_eq!(cfg.delivery_dispatch_time, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
    }
}
