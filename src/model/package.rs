use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use chrono::NaiveTime;

use crate::{
    config::Config,
    define_map,
    model::{location::DistanceGraph, location::LocationId, truck::TruckId, Map},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageId(pub u32);

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageStatus {
    OnRouteToDepot,
    AtHub,
    Loaded,
    OutForDelivery,
    Delivered,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusEntry {
    pub status: PackageStatus,
    pub location: LocationId,
    pub is_verified_address: bool,
    pub special_note: String,
}

/// `Map<Time, List<StatusSnapshot>>`: a package can accumulate
/// more than one observation at the same timestamp, in observation order.
pub type StatusSnapshot = BTreeMap<NaiveTime, Vec<StatusEntry>>;

#[derive(Debug, Clone)]
pub struct Package {
    pub id: PackageId,
    pub location: LocationId,
    pub is_verified_address: bool,
    pub deadline: NaiveTime,
    pub weight: u32,
    pub special_note: String,
    pub hub_arrival_time: NaiveTime,
    pub assigned_truck_id: Option<TruckId>,
    pub status: PackageStatus,
    pub delivery_time: Option<NaiveTime>,
    pub status_update_dict: StatusSnapshot,
}

impl Package {
    pub fn new(
        id: PackageId,
        location: LocationId,
        is_verified_address: bool,
        deadline: NaiveTime,
        weight: u32,
        special_note: String,
        hub_arrival_time: NaiveTime,
        assigned_truck_id: Option<TruckId>,
    ) -> Self {
        Self {
            id,
            location,
            is_verified_address,
            deadline,
            weight,
            special_note,
            hub_arrival_time,
            assigned_truck_id,
            status: PackageStatus::OnRouteToDepot,
            delivery_time: None,
            status_update_dict: BTreeMap::new(),
        }
    }

    /// Records a status transition, appending to any existing observation
    /// at the same timestamp rather than overwriting it.
    pub fn update_status(&mut self, status: PackageStatus, at: NaiveTime) {
        self.status = status;
        self.status_update_dict
            .entry(at)
            .or_default()
            .push(StatusEntry {
                status,
                location: self.location,
                is_verified_address: self.is_verified_address,
                special_note: self.special_note.clone(),
            });
    }

    pub fn relocate(&mut self, new_location: LocationId) {
        self.location = new_location;
        self.is_verified_address = true;
    }

    /// Canonical state at `query`: the last observation at or before it.
    pub fn status_at(&self, query: NaiveTime) -> Option<&StatusEntry> {
        self.status_update_dict
            .range(..=query)
            .next_back()
            .and_then(|(_, snapshots)| snapshots.last())
    }
}

define_map!(PackageId, Package, PackageMap);

/// Disjoint-set union over package ids, used to turn the "Must be delivered
/// with ..." notes into bundle equivalence classes. Replaces the original
/// implementation's repeated pairwise set-union passes
/// (`PackageHandler.unionize_bundled_sets`) with a proper DSU.
#[derive(Debug, Default)]
struct UnionFind {
    parent: BTreeMap<PackageId, PackageId>,
}

impl UnionFind {
    fn find(&mut self, id: PackageId) -> PackageId {
        let parent = *self.parent.entry(id).or_insert(id);
        if parent == id {
            return id;
        }
        let root = self.find(parent);
        self.parent.insert(id, root);
        root
    }

    fn union(&mut self, a: PackageId, b: PackageId) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent.insert(ra, rb);
        }
    }
}

/// Owns every [`Package`] and the side indexes the planner queries.
/// Built once from parsed CSV rows; mutated afterward only via
/// `update_status`/`relocate` during simulation.
#[derive(Debug)]
pub struct PackageStore {
    packages: PackageMap,
    by_location: BTreeMap<LocationId, BTreeSet<PackageId>>,
    bundles: BTreeMap<PackageId, BTreeSet<PackageId>>,
}

impl PackageStore {
    /// Builds the store from already-parsed packages plus the raw bundle
    /// edges pulled from "Must be delivered with ..." notes, and back-fills
    /// the aggregate annotations on `graph`'s locations.
    pub fn new(
        packages: Vec<Package>,
        bundle_edges: &[(PackageId, PackageId)],
        graph: &mut DistanceGraph,
        config: &Config,
    ) -> Self {
        let mut uf = UnionFind::default();
        for &(a, b) in bundle_edges {
            uf.union(a, b);
        }

        let mut classes: BTreeMap<PackageId, BTreeSet<PackageId>> = BTreeMap::new();
        for &package_id in packages.iter().map(|p| &p.id) {
            let root = uf.find(package_id);
            classes.entry(root).or_default().insert(package_id);
        }
        let mut bundles: BTreeMap<PackageId, BTreeSet<PackageId>> = BTreeMap::new();
        for class in classes.values() {
            if class.len() < 2 {
                continue;
            }
            for &member in class {
                let mut peers = class.clone();
                peers.remove(&member);
                bundles.insert(member, peers);
            }
        }

        let mut by_location: BTreeMap<LocationId, BTreeSet<PackageId>> = BTreeMap::new();
        let mut store_packages = PackageMap::default();
        for package in packages {
            by_location
                .entry(package.location)
                .or_default()
                .insert(package.id);
            store_packages.insert(package.id, package);
        }

        let mut store = Self {
            packages: store_packages,
            by_location,
            bundles,
        };
        store.refresh_location_annotations(graph, config);
        store
    }

    fn refresh_location_annotations(&self, graph: &mut DistanceGraph, config: &Config) {
        let end_of_day = config.delivery_return_time;
        let ids: Vec<LocationId> = graph.ids().collect();
        for location_id in ids {
            let location = graph.gets_mut(location_id);
            location.reset_planning_state(end_of_day);
        }
        for package in self.packages.values() {
            let location = graph.gets_mut(package.location);
            if package.deadline < location.earliest_deadline {
                location.earliest_deadline = package.deadline;
            }
            if package.hub_arrival_time > location.latest_package_arrival {
                location.latest_package_arrival = package.hub_arrival_time;
            }
            if package.assigned_truck_id.is_some() {
                location.has_required_truck_package = true;
            }
            if !package.is_verified_address {
                location.has_unconfirmed_package = true;
            }
            if package.hub_arrival_time > config.delivery_dispatch_time {
                location.has_delayed_package = true;
            }
            if self.bundles.contains_key(&package.id) {
                location.has_bundled_package = true;
            }
        }
        for (&location_id, locations) in &self.by_location {
            let mut truck_ids = locations
                .iter()
                .filter_map(|id| self.packages.gets(id).assigned_truck_id);
            if let Some(first) = truck_ids.next() {
                if truck_ids.all(|t| t == first) {
                    graph.gets_mut(location_id).assigned_truck_id = Some(first);
                }
            }
        }
    }

    pub fn get(&self, id: PackageId) -> Option<&Package> {
        self.packages.get(&id)
    }

    pub fn gets(&self, id: PackageId) -> &Package {
        self.packages.gets(&id)
    }

    pub fn get_mut(&mut self, id: PackageId) -> Option<&mut Package> {
        self.packages.get_mut(&id)
    }

    pub fn gets_mut(&mut self, id: PackageId) -> &mut Package {
        self.packages.gets_mut(&id)
    }

    pub fn ids(&self) -> impl Iterator<Item = PackageId> + '_ {
        self.packages.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// The bundle peers of `id` (excluding `id` itself); empty if `id`
    /// belongs to no bundle.
    pub fn bundle_of(&self, id: PackageId) -> BTreeSet<PackageId> {
        self.bundles.get(&id).cloned().unwrap_or_default()
    }

    pub fn is_bundled(&self, id: PackageId) -> bool {
        self.bundles.contains_key(&id)
    }

    pub fn packages_at(&self, location: LocationId) -> BTreeSet<PackageId> {
        self.by_location.get(&location).cloned().unwrap_or_default()
    }

    /// Packages that haven't arrived at the hub yet.
    pub fn delayed(&self, dispatch_time: NaiveTime, ignore_arrived: bool) -> BTreeSet<PackageId> {
        self.packages
            .values()
            .filter(|p| p.hub_arrival_time > dispatch_time)
            .filter(|p| !ignore_arrived || p.status == PackageStatus::OnRouteToDepot)
            .map(|p| p.id)
            .collect()
    }

    /// Packages required to ride a specific truck (or any, if `truck_id` is `None`).
    pub fn required_truck(&self, truck_id: Option<TruckId>) -> BTreeSet<PackageId> {
        self.packages
            .values()
            .filter(|p| match (p.assigned_truck_id, truck_id) {
                (Some(_), None) => true,
                (Some(t), Some(filter)) => t == filter,
                (None, _) => false,
            })
            .map(|p| p.id)
            .collect()
    }

    /// Every package belonging to a bundle. "Assigned" here means the
    /// package's location has been consumed by a committed run
    /// (`Location::been_assigned`), not that the package has a
    /// required-truck id.
    pub fn bundled(
        &self,
        graph: &DistanceGraph,
        all_location_packages: bool,
        ignore_assigned: bool,
    ) -> BTreeSet<PackageId> {
        let mut result: BTreeSet<PackageId> = BTreeSet::new();
        for (&member, peers) in &self.bundles {
            result.insert(member);
            result.extend(peers.iter().copied());
        }
        if all_location_packages {
            let locations: BTreeSet<LocationId> =
                result.iter().map(|id| self.gets(*id).location).collect();
            result = locations
                .into_iter()
                .flat_map(|loc| self.packages_at(loc))
                .collect();
        }
        if ignore_assigned {
            result.retain(|id| !graph.gets(self.gets(*id).location).been_assigned);
        }
        result
    }

    /// Every package still lacking address confirmation.
    pub fn unconfirmed(&self) -> BTreeSet<PackageId> {
        self.packages
            .values()
            .filter(|p| !p.is_verified_address)
            .map(|p| p.id)
            .collect()
    }

    /// Packages that have arrived at the hub by `current_time`.
    pub fn available(
        &self,
        graph: &DistanceGraph,
        current_time: NaiveTime,
        ignore_assigned: bool,
    ) -> BTreeSet<PackageId> {
        self.packages
            .values()
            .filter(|p| p.hub_arrival_time <= current_time)
            .filter(|p| !ignore_assigned || !graph.gets(p.location).been_assigned)
            .map(|p| p.id)
            .collect()
    }

    /// The distinct locations a set of packages resolves to.
    pub fn package_locations(
        &self,
        graph: &DistanceGraph,
        packages: impl IntoIterator<Item = PackageId>,
        ignore_assigned: bool,
    ) -> BTreeSet<LocationId> {
        packages
            .into_iter()
            .map(|id| self.gets(id))
            .filter(|p| !ignore_assigned || !graph.gets(p.location).been_assigned)
            .map(|p| p.location)
            .collect()
    }

    /// Promotes every `OnRouteToDepot` package whose `hub_arrival_time` has
    /// passed to `AtHub`, and re-homes every unconfirmed package once
    /// `address_change_time` is reached. Returns the ids that transitioned
    /// in each category.
    pub fn bulk_status_update(
        &mut self,
        graph: &DistanceGraph,
        current_time: NaiveTime,
        address_change_time: NaiveTime,
        corrected_address: &str,
    ) -> (BTreeSet<PackageId>, BTreeSet<PackageId>) {
        let mut arrived = BTreeSet::new();
        let mut relocated = BTreeSet::new();
        let ids: Vec<PackageId> = self.packages.keys().copied().collect();

        for id in ids {
            let package = self.packages.gets(&id);
            if package.status == PackageStatus::OnRouteToDepot && package.hub_arrival_time <= current_time {
                self.packages.gets_mut(&id).update_status(PackageStatus::AtHub, current_time);
                arrived.insert(id);
            }

            let package = self.packages.gets(&id);
            if !package.is_verified_address && address_change_time <= current_time {
                if let Some(new_location) = Self::match_corrected_address(graph, corrected_address) {
                    self.relocate(id, new_location, current_time);
                    relocated.insert(id);
                }
            }
        }

        (arrived, relocated)
    }

    /// The corrected address startswith-matches a location's canonical
    /// address and agrees on zip. A startswith comparison is used rather
    /// than exact equality since the correction carries trailing
    /// punctuation the canonical address does not.
    fn match_corrected_address(graph: &DistanceGraph, corrected_address: &str) -> Option<LocationId> {
        let zip: u32 = corrected_address.rsplit(' ').next()?.parse().ok()?;
        graph
            .iter()
            .find(|(_, location)| corrected_address.starts_with(&location.address) && location.zip_code == Some(zip))
            .map(|(&id, _)| id)
    }

    fn relocate(&mut self, id: PackageId, new_location: LocationId, at: NaiveTime) {
        let package = self.packages.gets_mut(&id);
        let old_location = package.location;
        package.relocate(new_location);
        let status = package.status;
        package.update_status(status, at);

        self.by_location.entry(old_location).or_default().remove(&id);
        self.by_location.entry(new_location).or_default().insert(id);
    }

    /// Every location's `earliest_deadline`/`latest_package_arrival` inside
    /// `window`, plus any caller-supplied special times.
    pub fn expected_update_times(
        &self,
        graph: &DistanceGraph,
        special_times: &[NaiveTime],
        window: (NaiveTime, NaiveTime),
    ) -> Vec<NaiveTime> {
        let mut times: BTreeSet<NaiveTime> = BTreeSet::new();
        for (_, location) in graph.iter() {
            for candidate in [location.earliest_deadline, location.latest_package_arrival] {
                if candidate >= window.0 && candidate <= window.1 {
                    times.insert(candidate);
                }
            }
        }
        for &t in special_times {
            times.insert(t);
        }
        times.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::location::Location;

    fn graph_with_two_stops() -> DistanceGraph {
        let eod = NaiveTime::from_hms_opt(19, 0, 0).unwrap();
        let mut hub = Location::new(LocationId(0), "Hub".into(), "HUB".into(), eod);
        hub.is_hub = true;
        let a = Location::new(LocationId(1), "A".into(), "123 A St".into(), eod);
        let matrix = vec![vec![0.0, 2.0], vec![2.0, 0.0]];
        DistanceGraph::from_rows(vec![hub, a], matrix)
    }

    fn base_package(id: u32) -> Package {
        Package::new(
            PackageId(id),
            LocationId(1),
            true,
            NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            5,
            String::new(),
            NaiveTime::from_hms_opt(4, 0, 0).unwrap(),
            None,
        )
    }

    #[test]
    fn bundle_equivalence_classes_merge_transitively() {
        let mut graph = graph_with_two_stops();
        let config = Config::default();
        let packages = vec![base_package(1), base_package(2), base_package(3)];
        let edges = [(PackageId(1), PackageId(2)), (PackageId(2), PackageId(3))];
        let store = PackageStore::new(packages, &edges, &mut graph, &config);
        let bundle = store.bundle_of(PackageId(1));
        assert_eq!(bundle, BTreeSet::from([PackageId(2), PackageId(3)]));
    }

    #[test]
    fn unbundled_package_has_empty_bundle() {
        let mut graph = graph_with_two_stops();
        let config = Config::default();
        let store = PackageStore::new(vec![base_package(1)], &[], &mut graph, &config);
        assert!(store.bundle_of(PackageId(1)).is_empty());
    }

    #[test]
    fn status_at_returns_last_observation_at_or_before_query() {
        let mut p = base_package(1);
        let t1 = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        let t2 = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        p.update_status(PackageStatus::AtHub, t1);
        p.update_status(PackageStatus::Loaded, t2);
        assert_eq!(p.status_at(t1).unwrap().status, PackageStatus::AtHub);
        assert_eq!(p.status_at(t2).unwrap().status, PackageStatus::Loaded);
        assert!(p.status_at(NaiveTime::from_hms_opt(7, 0, 0).unwrap()).is_none());
    }
}
