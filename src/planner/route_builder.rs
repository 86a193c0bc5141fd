use std::collections::{BTreeMap, BTreeSet};

use chrono::Duration;
use tracing::warn;

use crate::{
    config::Config,
    errors::RunError,
    model::{
        location::{DistanceGraph, LocationId},
        package::PackageStore,
        route_run::FocusedRun,
        truck::{Truck, TruckId, TruckMap},
        Map,
    },
    planner::run_planner::RunPlanner,
};

const EARLIEST_DEADLINE_WINDOW_SECONDS: i64 = 5400;
const UNCONFIRMED_RETRY_BACKOFF_SECONDS: i64 = -120;

/// One or more target locations a single call into [`RunPlanner`] should
/// cover together: a plain singleton, or a *paired target* carrying the
/// truck id two or more singleton targets turned out to share.
enum Target {
    Single(LocationId),
    Paired(TruckId, Vec<LocationId>),
}

impl Target {
    fn focus(&self, graph: &DistanceGraph) -> FocusedRun {
        match self {
            Target::Paired(..) => FocusedRun::AssignedTruck,
            Target::Single(id) => {
                let location = graph.gets(*id);
                if location.assigned_truck_id.is_some() {
                    FocusedRun::AssignedTruck
                } else if location.has_bundled_package {
                    FocusedRun::BundledPackage
                } else {
                    FocusedRun::None
                }
            }
        }
    }

    fn primary_location(&self) -> LocationId {
        match self {
            Target::Single(id) => *id,
            Target::Paired(_, ids) => ids[0],
        }
    }

    fn preferred_truck(&self) -> Option<TruckId> {
        match self {
            Target::Single(_) => None,
            Target::Paired(truck_id, _) => Some(*truck_id),
        }
    }
}

/// Strategy layer above [`RunPlanner`]: picks target locations, pairs
/// targets that share a required truck, allocates the truck pool, and
/// retries a run once with a revised start time on
/// [`RunError::UnconfirmedPackageDelivery`] or [`RunError::PackageNotArrived`].
/// A run that still carries an error after the retry (or that overlaps an
/// already-committed run on its truck) is abandoned rather than committed.
pub struct RouteBuilder;

impl RouteBuilder {
    pub fn build_optimized_runs(
        graph: &mut DistanceGraph,
        store: &mut PackageStore,
        config: &Config,
    ) -> TruckMap {
        let mut trucks = Self::initialize_trucks(graph, config);
        let targets = Self::calculate_best_targets(graph, store, config);

        for target in targets {
            Self::build_one(&target, graph, store, config, &mut trucks);
        }

        while let Some(location) = graph.non_hub_ids().find(|&id| !graph.gets(id).been_assigned) {
            Self::build_one(&Target::Single(location), graph, store, config, &mut trucks);
        }

        trucks
    }

    fn initialize_trucks(graph: &DistanceGraph, config: &Config) -> TruckMap {
        let hub = graph.hub();
        let mut trucks = TruckMap::default();
        for n in 1..=config.num_delivery_trucks {
            let id = TruckId(n);
            trucks.insert(id, Truck::new(id, hub, config.num_truck_capacity, config.standard_package_load_start_time));
        }
        trucks
    }

    /// Target selection (earliest deadline, furthest, opposite), followed by
    /// the paired-target fold when two or more singleton targets share an
    /// `assigned_truck_id`.
    fn calculate_best_targets(graph: &DistanceGraph, store: &PackageStore, config: &Config) -> Vec<Target> {
        let mut singles = Vec::new();

        if let Some(earliest) = Self::find_earliest_deadline_location(store, config) {
            singles.push(earliest);
        }

        let hub = graph.hub();
        let furthest = Self::find_furthest_location(graph, hub);
        singles.push(furthest);

        let opposite = Self::find_furthest_location(graph, furthest);
        singles.push(opposite);

        singles.dedup();

        let mut by_truck: BTreeMap<TruckId, Vec<LocationId>> = BTreeMap::new();
        for &id in &singles {
            if let Some(truck_id) = graph.gets(id).assigned_truck_id {
                by_truck.entry(truck_id).or_default().push(id);
            }
        }

        if let Some((&truck_id, paired_ids)) = by_truck.iter().find(|(_, ids)| ids.len() > 1) {
            let paired: BTreeSet<LocationId> = paired_ids.iter().copied().collect();
            let mut targets: Vec<Target> = singles
                .into_iter()
                .filter(|id| !paired.contains(id))
                .map(Target::Single)
                .collect();
            targets.push(Target::Paired(truck_id, paired.into_iter().collect()));
            targets.push(Target::Single(Self::find_most_spread_out_location(graph)));
            targets
        } else {
            singles.into_iter().map(Target::Single).collect()
        }
    }

    fn find_earliest_deadline_location(store: &PackageStore, config: &Config) -> Option<LocationId> {
        let deadline_criteria = config.delivery_dispatch_time + Duration::seconds(EARLIEST_DEADLINE_WINDOW_SECONDS);
        store
            .ids()
            .map(|id| store.gets(id))
            .filter(|p| p.deadline <= deadline_criteria)
            .min_by_key(|p| p.deadline)
            .map(|p| p.location)
    }

    fn find_furthest_location(graph: &DistanceGraph, from: LocationId) -> LocationId {
        graph
            .non_hub_ids()
            .filter(|&id| id != from)
            .max_by(|&a, &b| graph.distance(from, a).partial_cmp(&graph.distance(from, b)).unwrap())
            .unwrap_or(from)
    }

    fn find_most_spread_out_location(graph: &DistanceGraph) -> LocationId {
        graph
            .non_hub_ids()
            .max_by(|&a, &b| {
                let sum_a: f64 = graph.non_hub_ids().map(|id| graph.distance(a, id)).sum();
                let sum_b: f64 = graph.non_hub_ids().map(|id| graph.distance(b, id)).sum();
                sum_a.partial_cmp(&sum_b).unwrap()
            })
            .expect("distance graph carries at least one non-hub location")
    }

    /// Builds a single run for `target`, selecting its truck, invoking
    /// `RunPlanner`, retrying once on a recoverable error, and checking the
    /// result against the truck's already-committed runs for a time overlap.
    /// A run that still carries an error is abandoned: its locations are
    /// marked consumed without being pushed onto the truck.
    fn build_one(
        target: &Target,
        graph: &mut DistanceGraph,
        store: &mut PackageStore,
        config: &Config,
        trucks: &mut TruckMap,
    ) {
        let focus = target.focus(graph);
        let truck_id = Self::select_truck(target, graph, store, config, trucks);

        let mut start_time = config.delivery_dispatch_time;
        let mut run = RunPlanner::plan(
            target.primary_location(),
            truck_id,
            focus,
            start_time,
            true,
            graph,
            store,
            config,
        );

        if let Some(error) = run.error_type.clone() {
            // `PackageNotArrived` must retime to the offending package's own
            // arrival, or a run targeting a delayed package's location can
            // never commit and the catch-all assignment loop below spins on
            // it forever: any run whose required set touches a delayed
            // package must start no earlier than that package's own arrival.
            let retry_start = match &error {
                RunError::UnconfirmedPackageDelivery { .. } => run.error_location.and_then(|location| {
                    run.run_analysis_dict
                        .iter()
                        .find(|&(&(_, stop), _)| stop == location)
                        .map(|(_, entry)| {
                            entry.optimal_hub_departure_time + Duration::seconds(UNCONFIRMED_RETRY_BACKOFF_SECONDS)
                        })
                }),
                RunError::PackageNotArrived { package, .. } => Some(store.gets(*package).hub_arrival_time),
                _ => None,
            };

            if let Some(new_start_time) = retry_start {
                start_time = new_start_time;
                run = RunPlanner::plan(
                    target.primary_location(),
                    truck_id,
                    focus,
                    start_time,
                    true,
                    graph,
                    store,
                    config,
                );
            }
        }

        if run.error_type.is_none() {
            if let Some(truck) = trucks.get(&truck_id) {
                if let Some(overlapping) = truck
                    .runs
                    .iter()
                    .find(|existing| existing.start_time < run.estimated_completion_time && run.start_time < existing.estimated_completion_time)
                {
                    run.tag_error(RunError::OverlappingRouteRun { truck: truck_id }, overlapping.target_location);
                }
            }
        }

        if let Some(error) = &run.error_type {
            warn!(%truck_id, %error, "run could not be resolved, abandoning target");
            // Leave the location(s) marked assigned so the leftover-location
            // sweep in `build_optimized_runs` doesn't retry this exact target
            // forever: a fatal error here means this target goes undelivered,
            // not that the target should be attempted again.
            for &location in &run.locations {
                graph.gets_mut(location).been_assigned = true;
            }
            return;
        }

        if let Some(truck) = trucks.get_mut(&truck_id) {
            truck.runs.push(run);
        }
    }

    fn select_truck(
        target: &Target,
        graph: &DistanceGraph,
        store: &PackageStore,
        config: &Config,
        trucks: &TruckMap,
    ) -> TruckId {
        if let Some(preferred) = target.preferred_truck() {
            return preferred;
        }
        let location = graph.gets(target.primary_location());
        if let Some(required) = location.assigned_truck_id {
            return required;
        }

        let unassigned_total = store
            .ids()
            .map(|id| store.gets(id))
            .filter(|p| !graph.gets(p.location).been_assigned)
            .count();
        if unassigned_total <= config.num_truck_capacity as usize {
            if let Some(remaining) = store
                .ids()
                .map(|id| store.gets(id))
                .filter(|p| p.assigned_truck_id.is_some() && !graph.gets(p.location).been_assigned)
                .find_map(|p| p.assigned_truck_id)
            {
                return remaining;
            }
        }

        trucks
            .keys()
            .min_by_key(|&&id| trucks.gets(&id).runs.len())
            .copied()
            .unwrap_or(TruckId(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use crate::model::{
        location::Location,
        package::{Package, PackageId, PackageStore},
    };

    /// A location far enough from the hub that no route can reach it before
    /// its own deadline: `analyze` tags this `LateDelivery`, which isn't
    /// retriable, so the single retry in `build_one` never fires.
    fn unreachable_deadline_fixture() -> (DistanceGraph, PackageStore, Config) {
        let config = Config::default();
        let eod = config.delivery_return_time;
        let mut hub = Location::new(LocationId(0), "Hub".into(), "HUB".into(), eod);
        hub.is_hub = true;
        let a = Location::new(LocationId(1), "A".into(), "123 A St".into(), eod);
        let mut graph = DistanceGraph::from_rows(vec![hub, a], vec![vec![0.0, 50.0], vec![50.0, 0.0]]);

        let package = Package::new(
            PackageId(1),
            LocationId(1),
            true,
            config.delivery_dispatch_time,
            5,
            String::new(),
            NaiveTime::from_hms_opt(4, 0, 0).unwrap(),
            None,
        );
        let store = PackageStore::new(vec![package], &[], &mut graph, &config);
        (graph, store, config)
    }

    #[test]
    fn fatal_error_abandons_target_instead_of_looping_forever() {
        let (mut graph, mut store, config) = unreachable_deadline_fixture();

        let trucks = RouteBuilder::build_optimized_runs(&mut graph, &mut store, &config);

        assert!(
            graph.gets(LocationId(1)).been_assigned,
            "an unreachable location must still be consumed so the leftover sweep doesn't retry it"
        );
        let covered = trucks
            .values()
            .any(|truck| truck.runs.iter().any(|run| run.required_packages.contains(&PackageId(1))));
        assert!(!covered, "a run with an unresolved fatal error must not be committed to any truck");
    }
}
