use std::collections::BTreeSet;

use chrono::{Duration, NaiveTime};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use tracing::{info, warn};

use crate::{
    config::Config,
    model::{
        location::{DistanceGraph, LocationId},
        package::{PackageId, PackageStatus, PackageStore},
        truck::{Truck, TruckId, TruckMap},
        Map,
    },
};

/// Clock-driven fleet simulator . Consumes the `RouteRun`s built
/// by [`crate::planner::RouteBuilder`] and drives every truck through them
/// one second at a time.
///
/// The scheduled-update mechanism is a sorted `Vec<NaiveTime>` rather than a
/// `BinaryHeap`-backed event queue: there are no event payloads to carry
/// here, just timestamps to react to.
pub struct DeliverySimulator<'a> {
    graph: &'a DistanceGraph,
    config: &'a Config,
}

impl<'a> DeliverySimulator<'a> {
    pub fn new(graph: &'a DistanceGraph, config: &'a Config) -> Self {
        Self { graph, config }
    }

    /// Runs the whole day: initial load, then the 1-second tick loop, until
    /// every truck has exhausted its runs or the simulated clock passes the
    /// latest estimated completion time.
    pub fn run(&self, mut trucks: TruckMap, store: &mut PackageStore, seed: u64) -> TruckMap {
        let mut rng = SmallRng::seed_from_u64(seed);
        self.initial_load(&mut trucks, store, &mut rng);

        let Some(mut clock) = trucks.values().filter_map(|t| t.runs.first().map(|r| r.start_time)).min() else {
            return trucks;
        };
        let completion = trucks
            .values()
            .filter_map(|t| t.runs.iter().map(|r| r.estimated_completion_time).max())
            .max()
            .unwrap_or(clock);

        let mut scheduled_updates = store.expected_update_times(
            self.graph,
            &[self.config.package_address_change_time],
            (clock, completion),
        );
        let mut visited: BTreeSet<(TruckId, LocationId)> = BTreeSet::new();
        let mut active: BTreeSet<TruckId> = trucks.keys().copied().collect();

        while !active.is_empty() && clock <= completion {
            if scheduled_updates.first() == Some(&clock) {
                scheduled_updates.remove(0);
                self.fire_scheduled_update(&mut trucks, store, clock);
            }

            for truck_id in trucks.keys().copied().collect::<Vec<_>>() {
                if !active.contains(&truck_id) {
                    continue;
                }
                if self.tick_truck(truck_id, &mut trucks, store, clock, &mut visited) {
                    active.remove(&truck_id);
                }
            }

            clock += Duration::seconds(1);
        }

        trucks
    }

    /// Initial load : for each truck's first scheduled run, in
    /// ascending start-time order, loads every required package already
    /// `AtHub` and advances the shared clock by a deterministic per-package
    /// jitter. Packages still `OnRouteToDepot` are left for a later reload.
    fn initial_load(&self, trucks: &mut TruckMap, store: &mut PackageStore, rng: &mut SmallRng) {
        let mut order: Vec<TruckId> = trucks.keys().copied().collect();
        for &truck_id in &order {
            trucks.gets_mut(&truck_id).runs.sort_by_key(|r| r.start_time);
        }
        order.sort_by_key(|&id| trucks.gets(&id).runs.first().map(|r| r.start_time).unwrap_or(NaiveTime::MAX));

        let mut clock = self.config.standard_package_load_start_time;
        for truck_id in order {
            let truck = trucks.gets_mut(&truck_id);
            truck.clock = clock;
            let Some(run) = truck.runs.first() else { continue };
            let required: Vec<PackageId> = run.required_packages.iter().copied().collect();

            for package_id in required {
                if store.gets(package_id).status != PackageStatus::AtHub {
                    info!(truck_id = %truck_id, package = %package_id, "awaiting package arrival before initial load");
                    continue;
                }
                if truck.add_package(package_id, false, store).is_err() {
                    warn!(truck_id = %truck_id, package = %package_id, "truck capacity exceeded during initial load");
                    continue;
                }
                let weight = store.gets(package_id).weight.min(self.config.package_load_speed_max_seconds);
                let jitter = rng.random_range(weight..=self.config.package_load_speed_max_seconds);
                clock += Duration::seconds(jitter as i64);
                truck.clock = clock;
            }
        }
    }

    /// `bulk_status_update` reaction: promotes hub
    /// arrivals, re-homes address corrections, and on the first transition
    /// lets any truck parked at the hub with an active run opportunistically
    /// load now-available required packages (a *fast reload*).
    fn fire_scheduled_update(&self, trucks: &mut TruckMap, store: &mut PackageStore, clock: NaiveTime) {
        let (arrived, relocated) = store.bulk_status_update(
            self.graph,
            clock,
            self.config.package_address_change_time,
            &self.config.package_corrected_address,
        );

        if !arrived.is_empty() {
            info!(count = arrived.len(), "delayed packages arrived at the hub");
            let hub = self.graph.hub();
            for truck in trucks.values_mut() {
                if truck.current_location != hub || truck.current_run.is_none() {
                    continue;
                }
                let required: Vec<PackageId> = truck.runs[0].required_packages.iter().copied().collect();
                for package_id in required {
                    if store.gets(package_id).status == PackageStatus::AtHub && !truck.holds(package_id) {
                        if truck.add_package(package_id, false, store).is_err() {
                            warn!(truck_id = %truck.id, package = %package_id, "truck capacity exceeded during fast reload");
                        }
                    }
                }
                truck.dispatch(store);
            }
        }
        for package_id in relocated {
            info!(%package_id, "package address corrected");
        }
    }

    /// Advances one truck by one tick. Returns `true` if the truck has
    /// exhausted its runs and should leave the active set.
    fn tick_truck(
        &self,
        truck_id: TruckId,
        trucks: &mut TruckMap,
        store: &mut PackageStore,
        clock: NaiveTime,
        visited: &mut BTreeSet<(TruckId, LocationId)>,
    ) -> bool {
        let hub = self.graph.hub();
        let truck = trucks.gets_mut(&truck_id);
        truck.clock = clock;

        if truck.current_run.is_some() {
            if truck.runs[0].start_time > clock {
                return false;
            }

            // At the hub the route's leading `(hub, first_stop)` entry
            // carries the arrival time in `estimated_time_here` rather than
            // `estimated_time_at_next`, mirroring the original source's own
            // `current_location.is_hub` special case.
            let arrived = if truck.current_location == hub {
                match truck.next_location {
                    Some(next) => {
                        let key = (truck.current_location, next);
                        truck.runs[0].run_analysis_dict.get(&key).map(|e| e.estimated_time_here) == Some(clock)
                    }
                    None => false,
                }
            } else {
                let key = (truck.previous_location, truck.current_location);
                truck.runs[0].run_analysis_dict.get(&key).and_then(|e| e.estimated_time_at_next) == Some(clock)
            };
            if !arrived {
                return false;
            }

            truck.previous_location = truck.current_location;
            truck.current_location = truck.next_location.expect("advancing a run without a queued next stop");
            truck.runs[0].ordered_route.pop_front();

            if truck.runs[0].ordered_route.is_empty() {
                truck.runs.remove(0);
                truck.current_run = None;
                truck.next_location = None;

                if truck.runs.is_empty() {
                    if truck.current_location != hub {
                        if let Err(error) = truck.deliver(store, self.graph) {
                            warn!(truck_id = %truck_id, %error, "final delivery failed");
                        }
                    }
                    info!(truck_id = %truck_id, "route completed for the day");
                    return true;
                }

                info!(truck_id = %truck_id, "back at hub, reloading for next run");
                self.begin_run(truck, store);
                return false;
            }

            truck.next_location = truck.runs[0].ordered_route.front().copied();
            if truck.current_location != hub && visited.insert((truck_id, truck.current_location)) {
                if let Err(error) = truck.deliver(store, self.graph) {
                    warn!(truck_id = %truck_id, %error, "delivery failed");
                }
            }
            false
        } else if let Some(run) = truck.runs.first() {
            if run.start_time <= clock {
                self.begin_run(truck, store);
            }
            false
        } else {
            true
        }
    }

    /// Begins `truck`'s next queued run: positions it at the hub with the
    /// route's first stop queued as `next_location`, and loads whichever
    /// required packages are already `AtHub`.
    fn begin_run(&self, truck: &mut Truck, store: &mut PackageStore) {
        truck.current_run = Some(0);
        truck.previous_location = self.graph.hub();
        truck.current_location = truck.runs[0]
            .ordered_route
            .pop_front()
            .expect("a route always begins at the hub");
        truck.next_location = truck.runs[0].ordered_route.front().copied();

        let required: Vec<PackageId> = truck.runs[0].required_packages.iter().copied().collect();
        for package_id in required {
            if store.gets(package_id).status == PackageStatus::AtHub && !truck.holds(package_id) {
                if truck.add_package(package_id, false, store).is_err() {
                    warn!(truck_id = %truck.id, package = %package_id, "truck capacity exceeded beginning run");
                }
            }
        }
        truck.dispatch(store);
        info!(truck_id = %truck.id, "beginning route");
    }
}
