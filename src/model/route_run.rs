use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::NaiveTime;

use crate::{
    errors::{RunError, RunTag},
    model::{location::LocationId, package::PackageId, truck::TruckId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FocusedRun {
    #[default]
    None,
    AssignedTruck,
    BundledPackage,
}

/// One entry of `run_analysis_dict`, keyed by `(previous_location, location)`
/// — the per-arrival bookkeeping the planner consults to verify
/// constraints and the simulator consults to drive the tick loop.
#[derive(Debug, Clone)]
pub struct RunAnalysisEntry {
    pub distance_from_previous: f64,
    pub next_location: Option<LocationId>,
    pub distance_to_next: Option<f64>,
    pub estimated_mileage_here: f64,
    pub estimated_time_here: NaiveTime,
    pub estimated_mileage_at_next: Option<f64>,
    pub estimated_time_at_next: Option<NaiveTime>,
    pub latest_allowed_delivery_time: NaiveTime,
    pub latest_allowed_hub_departure: NaiveTime,
    pub departure_requirement_met: bool,
    pub delivery_time_requirement_met: bool,
    pub packages_delivered_so_far: BTreeSet<PackageId>,
    pub locations_visited_so_far: BTreeSet<LocationId>,
    pub estimated_mileage_to_hub: f64,
    pub estimated_time_to_hub: NaiveTime,
    pub hub_insertion_cost: f64,
    pub optimal_hub_departure_time: NaiveTime,
    pub min_optimal_hub_departure_time_so_far: NaiveTime,
    pub error: Option<RunError>,
}

/// A single hub→…→hub (or hub→…→last-stop) plan.
#[derive(Debug, Clone)]
pub struct RouteRun {
    pub target_location: LocationId,
    pub start_time: NaiveTime,
    pub return_to_hub: bool,
    pub ordered_route: VecDeque<LocationId>,
    pub locations: BTreeSet<LocationId>,
    pub estimated_mileage: f64,
    pub estimated_completion_time: NaiveTime,
    pub required_packages: BTreeSet<PackageId>,
    pub assigned_truck_id: Option<TruckId>,
    pub focused_run: FocusedRun,
    pub run_analysis_dict: BTreeMap<(LocationId, LocationId), RunAnalysisEntry>,
    pub error_type: Option<RunError>,
    pub error_location: Option<LocationId>,
    /// Set when the optimal-hub-return refinement truncates the route; an
    /// accepted verdict, not an error.
    pub run_tag: Option<RunTag>,
}

impl RouteRun {
    pub fn new(target_location: LocationId, start_time: NaiveTime, return_to_hub: bool, hub: LocationId) -> Self {
        let mut ordered_route = VecDeque::new();
        ordered_route.push_back(hub);
        Self {
            target_location,
            start_time,
            return_to_hub,
            ordered_route,
            locations: BTreeSet::new(),
            estimated_mileage: 0.0,
            estimated_completion_time: start_time,
            required_packages: BTreeSet::new(),
            assigned_truck_id: None,
            focused_run: FocusedRun::None,
            run_analysis_dict: BTreeMap::new(),
            error_type: None,
            error_location: None,
            run_tag: None,
        }
    }

    pub fn package_total(&self) -> usize {
        self.required_packages.len()
    }

    pub fn is_ok(&self) -> bool {
        self.error_type.is_none()
    }

    /// Tags the run with the first violating stop as `error_type`/
    /// `error_location`.
    pub fn tag_error(&mut self, error: RunError, location: LocationId) {
        self.error_type = Some(error);
        self.error_location = Some(location);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_run_starts_at_hub_with_no_error() {
        let run = RouteRun::new(
            LocationId(3),
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            true,
            LocationId(0),
        );
        assert_eq!(run.ordered_route.front(), Some(&LocationId(0)));
        assert!(run.is_ok());
    }
}
