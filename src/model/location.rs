use std::collections::BTreeMap;

use chrono::NaiveTime;

use crate::{
    define_map,
    model::{truck::TruckId, Map},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocationId(pub u32);

/// A single stop in the distance graph, carrying both its static identity
/// (name/address/zip/hub flag, the symmetric distance row) and the mutable
/// aggregate annotations the planner derives from the packages sitting here.
#[derive(Debug, Clone)]
pub struct Location {
    pub id: LocationId,
    pub name: String,
    pub address: String,
    pub city: Option<String>,
    pub zip_code: Option<u32>,
    pub is_hub: bool,
    distances: BTreeMap<LocationId, f64>,

    pub earliest_deadline: NaiveTime,
    pub latest_package_arrival: NaiveTime,
    pub has_required_truck_package: bool,
    pub has_bundled_package: bool,
    pub has_unconfirmed_package: bool,
    pub has_delayed_package: bool,
    pub assigned_truck_id: Option<TruckId>,
    pub been_assigned: bool,
    pub been_visited: bool,
}

impl Location {
    pub fn new(id: LocationId, name: String, address: String, end_of_day: NaiveTime) -> Self {
        Self {
            id,
            name,
            address,
            city: None,
            zip_code: None,
            is_hub: false,
            distances: BTreeMap::new(),
            earliest_deadline: end_of_day,
            latest_package_arrival: NaiveTime::MIN,
            has_required_truck_package: false,
            has_bundled_package: false,
            has_unconfirmed_package: false,
            has_delayed_package: false,
            assigned_truck_id: None,
            been_assigned: false,
            been_visited: false,
        }
    }

    pub fn set_distance(&mut self, other: LocationId, miles: f64) {
        self.distances.insert(other, miles);
    }

    pub fn distance_to(&self, other: LocationId) -> Option<f64> {
        if other == self.id {
            return Some(0.0);
        }
        self.distances.get(&other).copied()
    }

    /// Resets the mutable planning markers between independent builds
    /// (e.g. between test runs), leaving static identity untouched.
    pub fn reset_planning_state(&mut self, end_of_day: NaiveTime) {
        self.earliest_deadline = end_of_day;
        self.latest_package_arrival = NaiveTime::MIN;
        self.has_required_truck_package = false;
        self.has_bundled_package = false;
        self.has_unconfirmed_package = false;
        self.has_delayed_package = false;
        self.assigned_truck_id = None;
        self.been_assigned = false;
        self.been_visited = false;
    }
}

define_map!(LocationId, Location, LocationMap);

/// Immutable, once-built symmetric distance table over the fleet's
/// operating area.
#[derive(Debug, Clone)]
pub struct DistanceGraph {
    locations: LocationMap,
    hub: LocationId,
}

impl DistanceGraph {
    /// Builds a graph from an explicit locations list plus a full distance
    /// matrix (`matrix[i][j]` is the distance from `locations[i]` to
    /// `locations[j]`), bypassing the CSV grid reconstruction so tests can
    /// build small fixtures directly.
    pub fn from_rows(locations: Vec<Location>, matrix: Vec<Vec<f64>>) -> Self {
        assert_eq!(locations.len(), matrix.len(), "matrix must be square");
        let hub = locations
            .iter()
            .find(|l| l.is_hub)
            .map(|l| l.id)
            .expect("distance graph must designate exactly one hub");

        let mut by_id: LocationMap = LocationMap::default();
        for (i, mut location) in locations.into_iter().enumerate() {
            for (j, row) in matrix.iter().enumerate() {
                if i == j {
                    continue;
                }
                location.set_distance(LocationId(j as u32), row[j]);
            }
            by_id.insert(location.id, location);
        }
        Self {
            locations: by_id,
            hub,
        }
    }

    pub fn distance(&self, a: LocationId, b: LocationId) -> f64 {
        if a == b {
            return 0.0;
        }
        self.locations
            .gets(&a)
            .distance_to(b)
            .unwrap_or_else(|| panic!("missing distance from {a:?} to {b:?}"))
    }

    pub fn hub_distance(&self, a: LocationId) -> f64 {
        self.distance(a, self.hub)
    }

    pub fn hub(&self) -> LocationId {
        self.hub
    }

    pub fn get(&self, id: LocationId) -> Option<&Location> {
        self.locations.get(&id)
    }

    pub fn get_mut(&mut self, id: LocationId) -> Option<&mut Location> {
        self.locations.get_mut(&id)
    }

    pub fn gets(&self, id: LocationId) -> &Location {
        self.locations.gets(&id)
    }

    pub fn gets_mut(&mut self, id: LocationId) -> &mut Location {
        self.locations.gets_mut(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = LocationId> + '_ {
        self.locations.keys().copied()
    }

    pub fn non_hub_ids(&self) -> impl Iterator<Item = LocationId> + '_ {
        self.ids().filter(move |id| *id != self.hub)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LocationId, &Location)> {
        self.locations.iter()
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> DistanceGraph {
        let eod = NaiveTime::from_hms_opt(19, 0, 0).unwrap();
        let mut hub = Location::new(LocationId(0), "Hub".into(), "HUB".into(), eod);
        hub.is_hub = true;
        let a = Location::new(LocationId(1), "A".into(), "123 A St".into(), eod);
        let b = Location::new(LocationId(2), "B".into(), "456 B Ave".into(), eod);
        let matrix = vec![
            vec![0.0, 2.0, 4.0],
            vec![2.0, 0.0, 3.0],
            vec![4.0, 3.0, 0.0],
        ];
        DistanceGraph::from_rows(vec![hub, a, b], matrix)
    }

    #[test]
    fn distance_is_symmetric() {
        let g = graph();
        assert_eq!(g.distance(LocationId(1), LocationId(2)), 3.0);
        assert_eq!(g.distance(LocationId(2), LocationId(1)), 3.0);
    }

    #[test]
    fn hub_is_discovered_from_flag() {
        let g = graph();
        assert_eq!(g.hub(), LocationId(0));
        assert_eq!(g.hub_distance(LocationId(1)), 2.0);
    }
}
