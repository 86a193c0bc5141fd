use std::collections::BTreeSet;

use chrono::{Duration, NaiveTime};

use crate::{
    config::Config,
    errors::{RunError, RunTag},
    model::{
        location::{DistanceGraph, LocationId},
        package::PackageStore,
        route_run::{FocusedRun, RouteRun, RunAnalysisEntry},
        truck::TruckId,
    },
};

const REVISIT_DETOUR_THRESHOLD_MILES: f64 = 2.0;
const CLOSE_PROXIMITY_DELAYED_MILES: f64 = 0.75;
const CLOSE_PROXIMITY_REQUIRED_TRUCK_MILES: f64 = 0.75;
const CLOSE_PROXIMITY_UNCONFIRMED_MILES: f64 = 3.0;

/// Core heuristic : builds one [`RouteRun`] for a target
/// location and truck, validates it against the constraint set, and
/// revises it until the constraints hold or a fatal violation is found.
///
/// This implements only the *later* `run_analysis_dict`-keyed behavior the
/// spec designates as current; the legacy per-index `_two_opt` algorithm is
/// not reproduced anywhere in this crate.
pub struct RunPlanner;

impl RunPlanner {
    #[allow(clippy::too_many_arguments)]
    pub fn plan(
        target: LocationId,
        truck_id: TruckId,
        focus: FocusedRun,
        mut start_time: NaiveTime,
        return_to_hub: bool,
        graph: &mut DistanceGraph,
        store: &mut PackageStore,
        config: &Config,
    ) -> RouteRun {
        let hub = graph.hub();

        let delayed = store.delayed(config.delivery_dispatch_time, true);
        if !delayed.is_empty() && start_time == config.delivery_dispatch_time {
            let latest_delayed_arrival = delayed
                .iter()
                .map(|&id| store.gets(id).hub_arrival_time)
                .max()
                .unwrap();
            if graph.gets(target).earliest_deadline < latest_delayed_arrival {
                start_time = latest_delayed_arrival;
            }
        }

        let mut run = RouteRun::new(target, start_time, return_to_hub, hub);
        run.focused_run = focus;
        run.assigned_truck_id = Some(truck_id);

        Self::build_pool(&mut run, focus, graph, store, config);
        Self::order_stops(&mut run, graph, config);
        Self::fill_in(&mut run, graph, store, config);
        Self::revisit_optimize(&mut run, graph);
        Self::compute_required_packages(&mut run, store);
        Self::analyze(&mut run, graph, store, config);

        if run.error_type.is_some() {
            return run;
        }

        Self::try_optimal_hub_return(&mut run, graph, config);
        Self::commit(&mut run, graph, store);

        run
    }

    fn is_available(id: LocationId, graph: &DistanceGraph, start_time: NaiveTime) -> bool {
        let loc = graph.gets(id);
        !loc.is_hub && !loc.been_assigned && loc.latest_package_arrival <= start_time
    }

    fn estimated_package_total(locations: &BTreeSet<LocationId>, store: &PackageStore) -> usize {
        locations.iter().map(|&l| store.packages_at(l).len()).sum()
    }

    fn is_valid_for_run(
        id: LocationId,
        run: &RouteRun,
        graph: &DistanceGraph,
        store: &PackageStore,
        config: &Config,
    ) -> bool {
        if !Self::is_available(id, graph, run.start_time) {
            return false;
        }
        let mut projected = run.locations.clone();
        projected.insert(id);
        if Self::estimated_package_total(&projected, store) > config.num_truck_capacity as usize {
            return false;
        }
        matches!(graph.gets(id).assigned_truck_id, None) || graph.gets(id).assigned_truck_id == run.assigned_truck_id
    }

    fn build_pool(
        run: &mut RouteRun,
        focus: FocusedRun,
        graph: &DistanceGraph,
        store: &PackageStore,
        config: &Config,
    ) {
        if focus == FocusedRun::AssignedTruck {
            run.locations.insert(run.target_location);
            let truck_id = run.assigned_truck_id;
            for id in store.required_truck(truck_id) {
                run.locations.insert(store.gets(id).location);
            }
            while run.locations.len() < config.closest_neighbor_minimum {
                match Self::farthest_unchosen(run, graph, store, config) {
                    Some(next) => {
                        run.locations.insert(next);
                    }
                    None => break,
                }
                if Self::estimated_package_total(&run.locations, store) > config.num_truck_capacity as usize {
                    break;
                }
            }
        } else {
            let mut candidates: Vec<LocationId> = graph
                .non_hub_ids()
                .filter(|&id| Self::is_available(id, graph, run.start_time))
                .collect();
            candidates.sort_by(|&a, &b| {
                graph
                    .distance(run.target_location, a)
                    .partial_cmp(&graph.distance(run.target_location, b))
                    .unwrap()
            });
            run.locations.insert(run.target_location);
            for &id in candidates.iter().take(2) {
                run.locations.insert(id);
            }

            while run.locations.len() < config.closest_neighbor_minimum {
                match Self::nearest_valid_neighbor(run, graph, store, config) {
                    Some(next) => {
                        run.locations.insert(next);
                    }
                    None => break,
                }
            }
        }

        let bundled_here: Vec<LocationId> = run
            .locations
            .iter()
            .filter(|&&id| graph.gets(id).has_bundled_package)
            .copied()
            .collect();
        for loc in bundled_here {
            for pkg in store.packages_at(loc) {
                for peer in store.bundle_of(pkg) {
                    let peer_location = store.gets(peer).location;
                    if let Some(required) = graph.gets(peer_location).assigned_truck_id {
                        if run.assigned_truck_id.is_some() && run.assigned_truck_id != Some(required) {
                            // A bundle peer's location demands a different truck than
                            // the one this run is already committed to: the bundle
                            // can't be kept together on one truck. `commit` surfaces
                            // this once the rest of the run has been built.
                            run.assigned_truck_id = None;
                        }
                    }
                    run.locations.insert(peer_location);
                }
            }
        }
    }

    fn farthest_unchosen(
        run: &RouteRun,
        graph: &DistanceGraph,
        store: &PackageStore,
        config: &Config,
    ) -> Option<LocationId> {
        graph
            .non_hub_ids()
            .filter(|&id| !run.locations.contains(&id))
            .filter(|&id| Self::is_valid_for_run(id, run, graph, store, config))
            .max_by(|&a, &b| {
                let sum_a: f64 = run.locations.iter().map(|&l| graph.distance(a, l)).sum();
                let sum_b: f64 = run.locations.iter().map(|&l| graph.distance(b, l)).sum();
                sum_a.partial_cmp(&sum_b).unwrap()
            })
    }

    fn nearest_valid_neighbor(
        run: &RouteRun,
        graph: &DistanceGraph,
        store: &PackageStore,
        config: &Config,
    ) -> Option<LocationId> {
        graph
            .non_hub_ids()
            .filter(|&id| !run.locations.contains(&id))
            .filter(|&id| Self::is_valid_for_run(id, run, graph, store, config))
            .min_by(|&a, &b| {
                let min_a = run
                    .locations
                    .iter()
                    .map(|&l| graph.distance(a, l))
                    .fold(f64::MAX, f64::min);
                let min_b = run
                    .locations
                    .iter()
                    .map(|&l| graph.distance(b, l))
                    .fold(f64::MAX, f64::min);
                min_a.partial_cmp(&min_b).unwrap()
            })
    }

    /// Greedy nearest-pair ordering: starting at the
    /// hub, repeatedly append the unvisited pair that minimizes
    /// `d(current, next) + d(next, following)`, favoring the pair
    /// containing `target_location` on a near-tie.
    fn order_stops(run: &mut RouteRun, graph: &DistanceGraph, _config: &Config) {
        let mut unvisited: Vec<LocationId> = run.locations.iter().copied().collect();
        let mut current = graph.hub();

        while !unvisited.is_empty() {
            if unvisited.len() == 1 {
                let only = unvisited.remove(0);
                run.ordered_route.push_back(only);
                current = only;
                continue;
            }

            let mut best: Option<(usize, usize, f64)> = None;
            for i in 0..unvisited.len() {
                for j in 0..unvisited.len() {
                    if i == j {
                        continue;
                    }
                    let next = unvisited[i];
                    let following = unvisited[j];
                    let cost = graph.distance(current, next) + graph.distance(next, following);
                    let favors_target = next == run.target_location || following == run.target_location;
                    match best {
                        None => best = Some((i, j, cost)),
                        Some((_, _, best_cost)) => {
                            if cost < best_cost
                                || (favors_target && cost <= best_cost + 1.5)
                            {
                                best = Some((i, j, cost));
                            }
                        }
                    }
                }
            }

            let (i, j, _) = best.unwrap();
            let (next, following) = (unvisited[i], unvisited[j]);
            run.ordered_route.push_back(next);
            run.ordered_route.push_back(following);
            current = following;
            let mut indices = [i, j];
            indices.sort_unstable();
            unvisited.remove(indices[1]);
            unvisited.remove(indices[0]);
        }

        if run.return_to_hub {
            run.ordered_route.push_back(graph.hub());
        }
    }

    /// Fill-in pass: inserts any location whose
    /// insertion between two consecutive stops stays within the mileage
    /// allowance and is not too close to delayed/required-truck/unconfirmed
    /// locations it hasn't already claimed.
    fn fill_in(run: &mut RouteRun, graph: &DistanceGraph, store: &PackageStore, config: &Config) {
        loop {
            let stops: Vec<LocationId> = run.ordered_route.iter().copied().collect();
            let mut best: Option<(usize, LocationId, f64)> = None;

            for candidate in graph.non_hub_ids() {
                if run.locations.contains(&candidate) || !Self::is_available(candidate, graph, run.start_time) {
                    continue;
                }
                if Self::estimated_package_total(&run.locations, store) + store.packages_at(candidate).len()
                    > config.num_truck_capacity as usize
                {
                    continue;
                }
                if Self::too_close_to_excluded(candidate, graph) {
                    continue;
                }
                for w in 0..stops.len().saturating_sub(1) {
                    let (a, b) = (stops[w], stops[w + 1]);
                    let added = graph.distance(a, candidate) + graph.distance(candidate, b) - graph.distance(a, b);
                    if added <= config.fill_in_insertion_allowance {
                        if best.map(|(_, _, c)| added < c).unwrap_or(true) {
                            best = Some((w + 1, candidate, added));
                        }
                    }
                }
            }

            match best {
                Some((index, candidate, _)) => {
                    run.ordered_route.insert(index, candidate);
                    run.locations.insert(candidate);
                }
                None => break,
            }
        }

        if !run.return_to_hub {
            loop {
                let last = *run.ordered_route.back().unwrap();
                let next = graph
                    .non_hub_ids()
                    .filter(|&id| !run.locations.contains(&id))
                    .filter(|&id| Self::is_available(id, graph, run.start_time))
                    .filter(|&id| graph.distance(last, id) <= config.fill_in_insertion_allowance)
                    .filter(|&id| {
                        Self::estimated_package_total(&run.locations, store) + store.packages_at(id).len()
                            <= config.num_truck_capacity as usize
                    })
                    .min_by(|&a, &b| graph.distance(last, a).partial_cmp(&graph.distance(last, b)).unwrap());
                match next {
                    Some(id) => {
                        run.ordered_route.push_back(id);
                        run.locations.insert(id);
                    }
                    None => break,
                }
            }
        }
    }

    fn too_close_to_excluded(candidate: LocationId, graph: &DistanceGraph) -> bool {
        for (&other_id, other) in graph.iter() {
            if other_id == candidate || other.is_hub {
                continue;
            }
            let dist = graph.distance(candidate, other_id);
            if other.has_delayed_package && dist <= CLOSE_PROXIMITY_DELAYED_MILES {
                return true;
            }
            if other.has_required_truck_package && dist <= CLOSE_PROXIMITY_REQUIRED_TRUCK_MILES {
                return true;
            }
            if other.has_unconfirmed_package && dist <= CLOSE_PROXIMITY_UNCONFIRMED_MILES {
                return true;
            }
        }
        false
    }

    /// Revisit optimization: for each stop whose leg from the previous stop
    /// exceeds 2 mi, see if visiting an earlier stop first and detouring
    /// back would cost less than the current triangle, and reorder if so.
    /// Repeats to a fixpoint.
    fn revisit_optimize(run: &mut RouteRun, graph: &DistanceGraph) {
        loop {
            let route: Vec<LocationId> = run.ordered_route.iter().copied().collect();
            let mut improved = false;

            'outer: for i in 1..route.len() {
                let prev = route[i - 1];
                let stop = route[i];
                if graph.distance(prev, stop) <= REVISIT_DETOUR_THRESHOLD_MILES {
                    continue;
                }
                for k in 0..i - 1 {
                    let insert_candidate = route[k];
                    if insert_candidate == prev || insert_candidate == stop || graph.gets(insert_candidate).is_hub {
                        continue;
                    }
                    let current_cost = graph.distance(prev, stop);
                    let detour_cost =
                        graph.distance(prev, insert_candidate) + graph.distance(insert_candidate, stop);
                    if detour_cost < current_cost {
                        let mut new_route = run.ordered_route.clone();
                        let (idx, _) = new_route
                            .iter()
                            .enumerate()
                            .find(|(_, &id)| id == insert_candidate)
                            .unwrap();
                        new_route.remove(idx);
                        let insert_at = new_route.iter().position(|&id| id == stop).unwrap();
                        new_route.insert(insert_at, insert_candidate);
                        run.ordered_route = new_route;
                        improved = true;
                        break 'outer;
                    }
                }
            }

            if !improved {
                break;
            }
        }
    }

    fn compute_required_packages(run: &mut RouteRun, store: &PackageStore) {
        let mut required = BTreeSet::new();
        for &location in &run.locations {
            for pkg in store.packages_at(location) {
                required.insert(pkg);
                required.extend(store.bundle_of(pkg));
            }
        }
        run.required_packages = required;
    }

    /// Analysis and verdict : fills `run_analysis_dict` while
    /// walking the route, stopping at the first constraint violation.
    fn analyze(run: &mut RouteRun, graph: &DistanceGraph, store: &PackageStore, config: &Config) {
        let route: Vec<LocationId> = run.ordered_route.iter().copied().collect();
        let mut cumulative_miles = 0.0;
        let mut delivered_so_far: BTreeSet<_> = BTreeSet::new();
        let mut visited_so_far: BTreeSet<_> = BTreeSet::new();
        let mut min_hub_departure_so_far: Option<NaiveTime> = None;

        for i in 1..route.len() {
            let prev = route[i - 1];
            let stop = route[i];
            let leg = graph.distance(prev, stop);
            cumulative_miles += leg;
            let estimated_time_here = config.time_at(cumulative_miles, run.start_time, 0);

            let next_location = route.get(i + 1).copied();
            let (estimated_mileage_at_next, estimated_time_at_next, distance_to_next) =
                if let Some(next) = next_location {
                    let d = graph.distance(stop, next);
                    let m = cumulative_miles + d;
                    (Some(m), Some(config.time_at(m, run.start_time, 0)), Some(d))
                } else {
                    (None, None, None)
                };

            let is_hub_stop = graph.gets(stop).is_hub;
            let stop_packages = store.packages_at(stop);

            if !is_hub_stop {
                visited_so_far.insert(stop);
                delivered_so_far.extend(stop_packages.iter().copied());
            }

            let latest_allowed_delivery_time = if is_hub_stop {
                config.delivery_return_time
            } else {
                graph.gets(stop).earliest_deadline
            };
            let travel_from_hub = graph.hub_distance(stop);
            let duration_from_hub =
                Duration::milliseconds(((travel_from_hub / config.delivery_truck_mph) * 3_600_000.0).round() as i64);
            let optimal_hub_departure_time = latest_allowed_delivery_time - duration_from_hub;
            let latest_allowed_hub_departure = optimal_hub_departure_time;
            min_hub_departure_so_far = Some(match min_hub_departure_so_far {
                Some(prev_min) => prev_min.min(optimal_hub_departure_time),
                None => optimal_hub_departure_time,
            });

            let estimated_mileage_to_hub = cumulative_miles + graph.hub_distance(stop);
            let estimated_time_to_hub = config.time_at(estimated_mileage_to_hub, run.start_time, 0);
            let hub_insertion_cost = graph.hub_distance(prev) + graph.hub_distance(stop) - leg;

            let departure_requirement_met = run.start_time <= latest_allowed_hub_departure;
            let delivery_time_requirement_met = estimated_time_here <= latest_allowed_delivery_time;

            let mut error = None;
            if !is_hub_stop {
                if let Some(&late_pkg) = stop_packages
                    .iter()
                    .find(|&&pkg| store.gets(pkg).hub_arrival_time > run.start_time)
                {
                    error = Some(RunError::PackageNotArrived {
                        package: late_pkg,
                        location: stop,
                    });
                } else if !delivery_time_requirement_met {
                    error = Some(RunError::LateDelivery { location: stop });
                } else if let Some(&unconfirmed_pkg) = stop_packages.iter().find(|&&pkg| {
                    !store.gets(pkg).is_verified_address && config.package_address_change_time > estimated_time_here
                }) {
                    error = Some(RunError::UnconfirmedPackageDelivery {
                        package: unconfirmed_pkg,
                        location: stop,
                    });
                }
            }

            let entry = RunAnalysisEntry {
                distance_from_previous: leg,
                next_location,
                distance_to_next,
                estimated_mileage_here: cumulative_miles,
                estimated_time_here,
                estimated_mileage_at_next,
                estimated_time_at_next,
                latest_allowed_delivery_time,
                latest_allowed_hub_departure,
                departure_requirement_met,
                delivery_time_requirement_met,
                packages_delivered_so_far: delivered_so_far.clone(),
                locations_visited_so_far: visited_so_far.clone(),
                estimated_mileage_to_hub,
                estimated_time_to_hub,
                hub_insertion_cost,
                optimal_hub_departure_time,
                min_optimal_hub_departure_time_so_far: min_hub_departure_so_far.unwrap(),
                error: error.clone(),
            };
            run.run_analysis_dict.insert((prev, stop), entry);

            if let Some(err) = error {
                run.tag_error(err, stop);
                return;
            }
        }

        run.estimated_mileage = cumulative_miles;
        run.estimated_completion_time = config.time_at(cumulative_miles, run.start_time, 0);
    }

    /// Optimal hub return : truncates the route at a
    /// well-placed stop when the hub-insertion detour is cheap and enough
    /// packages have already been accounted for.
    fn try_optimal_hub_return(run: &mut RouteRun, graph: &DistanceGraph, config: &Config) {
        if run.package_total() <= config.num_truck_capacity as usize {
            return;
        }
        let threshold = run.package_total() % config.num_truck_capacity as usize;

        let best = run
            .run_analysis_dict
            .iter()
            .filter(|(&(_, stop), _)| !graph.gets(stop).is_hub)
            .filter(|(_, entry)| {
                entry.hub_insertion_cost > 0.0
                    && entry.hub_insertion_cost <= config.hub_return_insertion_allowance
                    && entry.packages_delivered_so_far.len() >= threshold
            })
            .min_by(|(_, a), (_, b)| a.hub_insertion_cost.partial_cmp(&b.hub_insertion_cost).unwrap())
            .map(|(&(_, stop), entry)| (stop, entry.estimated_mileage_to_hub, entry.estimated_time_to_hub));

        let Some((stop, mileage_to_hub, time_to_hub)) = best else {
            return;
        };

        while run.ordered_route.back().copied() != Some(stop) {
            if run.ordered_route.pop_back().is_none() {
                break;
            }
        }
        let hub = graph.hub();
        run.ordered_route.push_back(hub);

        let retained_pairs: BTreeSet<(LocationId, LocationId)> = run
            .ordered_route
            .iter()
            .zip(run.ordered_route.iter().skip(1))
            .map(|(&a, &b)| (a, b))
            .collect();
        run.run_analysis_dict.retain(|key, _| retained_pairs.contains(key));

        run.estimated_mileage = mileage_to_hub;
        run.estimated_completion_time = time_to_hub;
        run.run_tag = Some(RunTag::OptimalHubReturn { after_location: stop });
    }

    /// Commit : marks every visited location consumed, and
    /// propagates the run's truck id onto its required packages, flagging a
    /// conflict as [`RunError::InvalidRouteRun`] rather than silently
    /// overwriting a different truck's claim. A run whose bundle expansion
    /// pulled in a location requiring a different truck than the one it was
    /// built for has no truck id left at this point; that's reported as
    /// [`RunError::BundledPackageTruckAssignment`] instead of committing.
    fn commit(run: &mut RouteRun, graph: &mut DistanceGraph, store: &mut PackageStore) {
        let Some(truck_id) = run.assigned_truck_id else {
            let package = *run
                .required_packages
                .iter()
                .next()
                .expect("a run reaching commit always required at least one package");
            run.tag_error(RunError::BundledPackageTruckAssignment { package }, run.target_location);
            return;
        };

        for &location in &run.locations {
            graph.gets_mut(location).been_assigned = true;
        }

        for &package_id in run.required_packages.clone().iter() {
            let package = store.gets_mut(package_id);
            match package.assigned_truck_id {
                None => package.assigned_truck_id = Some(truck_id),
                Some(existing) if existing != truck_id => {
                    run.tag_error(
                        RunError::InvalidRouteRun {
                            location: run.target_location,
                        },
                        run.target_location,
                    );
                    return;
                }
                _ => {}
            }
        }
    }
}
