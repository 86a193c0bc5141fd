use std::collections::BTreeSet;

use chrono::NaiveTime;

use crate::{
    define_map,
    errors::RunError,
    model::{
        location::{DistanceGraph, LocationId},
        package::{PackageId, PackageStatus, PackageStore},
        route_run::RouteRun,
        Map, SlotTable,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TruckId(pub u32);

impl std::fmt::Display for TruckId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mutable vehicle state. The slot table is composed in, not inherited.
#[derive(Debug)]
pub struct Truck {
    pub id: TruckId,
    pub clock: NaiveTime,
    pub dispatch_time: Option<NaiveTime>,
    pub previous_location: LocationId,
    pub current_location: LocationId,
    pub next_location: Option<LocationId>,
    pub runs: Vec<RouteRun>,
    pub current_run: Option<usize>,
    inventory: SlotTable<PackageId>,
}

impl Truck {
    pub fn new(id: TruckId, hub: LocationId, capacity: u32, start_clock: NaiveTime) -> Self {
        Self {
            id,
            clock: start_clock,
            dispatch_time: None,
            previous_location: hub,
            current_location: hub,
            next_location: None,
            runs: Vec::new(),
            current_run: None,
            inventory: SlotTable::new(capacity as usize),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inventory.capacity()
    }

    pub fn size(&self) -> usize {
        self.inventory.len()
    }

    pub fn holds(&self, package: PackageId) -> bool {
        self.inventory.contains(package.0)
    }

    pub fn held_packages(&self) -> impl Iterator<Item = PackageId> + '_ {
        self.inventory.values().copied()
    }

    /// Loads `package` onto the truck. When `simulated` is false (a real,
    /// observable load rather than planning bookkeeping), the package
    /// transitions to `Loaded` at the truck's current clock.
    pub fn add_package(
        &mut self,
        package: PackageId,
        simulated: bool,
        store: &mut PackageStore,
    ) -> Result<(), RunError> {
        if !self.inventory.insert(package.0, package) {
            return Err(RunError::TruckCapacityExceeded { truck: self.id });
        }
        if !simulated {
            store.gets_mut(package).update_status(PackageStatus::Loaded, self.clock);
        }
        Ok(())
    }

    /// Sets `dispatch_time` on first departure and marks every package
    /// currently held `OutForDelivery`.
    pub fn dispatch(&mut self, store: &mut PackageStore) {
        if self.dispatch_time.is_none() {
            self.dispatch_time = Some(self.clock);
        }
        for package_id in self.held_packages().collect::<Vec<_>>() {
            store.gets_mut(package_id).update_status(PackageStatus::OutForDelivery, self.clock);
        }
    }

    /// Delivers every held package whose destination is the truck's
    /// current (non-hub) location.
    pub fn deliver(
        &mut self,
        store: &mut PackageStore,
        graph: &DistanceGraph,
    ) -> Result<BTreeSet<PackageId>, RunError> {
        debug_assert!(self.current_location != graph.hub(), "deliver() called at the hub");
        let due_here = store.packages_at(self.current_location);
        let mut delivered = BTreeSet::new();
        for package_id in due_here {
            if !self.holds(package_id) {
                return Err(RunError::PackageNotOnTruck {
                    package: package_id,
                    truck: self.id,
                });
            }
            store
                .gets_mut(package_id)
                .update_status(PackageStatus::Delivered, self.clock);
            store.gets_mut(package_id).delivery_time = Some(self.clock);
            self.inventory.remove(package_id.0);
            delivered.insert(package_id);
        }
        Ok(delivered)
    }

    /// Removes and returns every held package.
    pub fn unload(&mut self) -> BTreeSet<PackageId> {
        let held: Vec<PackageId> = self.inventory.ids().map(PackageId).collect();
        for id in &held {
            self.inventory.remove(id.0);
        }
        held.into_iter().collect()
    }

    /// Thin graph query defaulting both endpoints to the truck's current
    /// location.
    pub fn distance(
        &self,
        graph: &DistanceGraph,
        origin: Option<LocationId>,
        target: Option<LocationId>,
        to_hub: bool,
    ) -> f64 {
        let from = origin.unwrap_or(self.current_location);
        if to_hub {
            return graph.hub_distance(from);
        }
        let to = target.unwrap_or(self.current_location);
        graph.distance(from, to)
    }
}

define_map!(TruckId, Truck, TruckMap);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, model::location::Location};

    fn graph() -> DistanceGraph {
        let eod = NaiveTime::from_hms_opt(19, 0, 0).unwrap();
        let mut hub = Location::new(LocationId(0), "Hub".into(), "HUB".into(), eod);
        hub.is_hub = true;
        let a = Location::new(LocationId(1), "A".into(), "123 A St".into(), eod);
        DistanceGraph::from_rows(vec![hub, a], vec![vec![0.0, 2.0], vec![2.0, 0.0]])
    }

    fn store_with_one_package() -> (PackageStore, DistanceGraph) {
        let mut graph = graph();
        let config = Config::default();
        let package = crate::model::package::Package::new(
            PackageId(1),
            LocationId(1),
            true,
            NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
            5,
            String::new(),
            NaiveTime::from_hms_opt(4, 0, 0).unwrap(),
            None,
        );
        let store = PackageStore::new(vec![package], &[], &mut graph, &config);
        (store, graph)
    }

    #[test]
    fn add_package_respects_capacity() {
        let (mut store, _graph) = store_with_one_package();
        let mut truck = Truck::new(TruckId(1), LocationId(0), 1, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert!(truck.add_package(PackageId(1), true, &mut store).is_ok());
        assert_eq!(
            truck.add_package(PackageId(2), true, &mut store),
            Err(RunError::TruckCapacityExceeded { truck: TruckId(1) })
        );
    }

    #[test]
    fn deliver_requires_holding_the_package() {
        let (mut store, graph) = store_with_one_package();
        let mut truck = Truck::new(TruckId(1), LocationId(0), 16, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        truck.current_location = LocationId(1);
        assert_eq!(
            truck.deliver(&mut store, &graph),
            Err(RunError::PackageNotOnTruck {
                package: PackageId(1),
                truck: TruckId(1)
            })
        );
        truck.add_package(PackageId(1), true, &mut store).unwrap();
        let delivered = truck.deliver(&mut store, &graph).unwrap();
        assert_eq!(delivered, BTreeSet::from([PackageId(1)]));
        assert_eq!(store.gets(PackageId(1)).status, PackageStatus::Delivered);
    }
}
