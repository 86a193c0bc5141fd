use std::path::PathBuf;

use chrono::NaiveTime;
use parcel_dispatch::{
    config::Config,
    csv_loader,
    model::{
        location::LocationId,
        package::{PackageId, PackageStatus},
        truck::TruckId,
        Map,
    },
    planner::RouteBuilder,
    simulation::DeliverySimulator,
};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("data").join(name)
}

/// End-to-end smoke test over the shipped fixture CSVs: build runs, run the
/// simulator, and check every package reaches `Delivered` on or before its
/// deadline.
#[test]
fn full_day_delivers_every_package_on_time() {
    let config = Config::default();
    let mut graph = csv_loader::load_distance_graph(fixture("distance_table.csv")).unwrap();
    let mut store = csv_loader::load_packages(fixture("package_file.csv"), &mut graph, &config).unwrap();

    let trucks = RouteBuilder::build_optimized_runs(&mut graph, &mut store, &config);
    let simulator = DeliverySimulator::new(&graph, &config);
    simulator.run(trucks, &mut store, 727);

    for id in store.ids() {
        let package = store.gets(id);
        assert_eq!(package.status, PackageStatus::Delivered, "package {id} never delivered");
        let delivered_at = package.delivery_time.expect("delivered package carries a delivery time");
        assert!(
            delivered_at <= package.deadline,
            "package {id} delivered at {delivered_at} after deadline {}",
            package.deadline
        );
    }
}

/// Truck-2-only packages (scenario 3): every run touching one of them is
/// assigned to truck 2, and every such package ends up truck-2-assigned.
#[test]
fn truck_restricted_packages_stay_on_their_truck() {
    let config = Config::default();
    let mut graph = csv_loader::load_distance_graph(fixture("distance_table.csv")).unwrap();
    let mut store = csv_loader::load_packages(fixture("package_file.csv"), &mut graph, &config).unwrap();

    let trucks = RouteBuilder::build_optimized_runs(&mut graph, &mut store, &config);

    let restricted = PackageId(3);
    assert_eq!(store.gets(restricted).assigned_truck_id, Some(TruckId(2)));

    let truck = trucks.gets(&TruckId(2));
    let covers_restricted = truck.runs.iter().any(|run| run.required_packages.contains(&restricted));
    assert!(covers_restricted, "truck 2 should carry package 3");
}

/// Bundle of two (scenario 4, scaled down): packages 4 and 5 name each
/// other via "Must be delivered with", so both end up on the same truck.
#[test]
fn bundled_packages_share_a_truck() {
    let config = Config::default();
    let mut graph = csv_loader::load_distance_graph(fixture("distance_table.csv")).unwrap();
    let mut store = csv_loader::load_packages(fixture("package_file.csv"), &mut graph, &config).unwrap();

    let bundle = store.bundle_of(PackageId(4));
    assert!(bundle.contains(&PackageId(5)));

    RouteBuilder::build_optimized_runs(&mut graph, &mut store, &config);
    assert_eq!(
        store.gets(PackageId(4)).assigned_truck_id,
        store.gets(PackageId(5)).assigned_truck_id
    );
}

/// Delayed arrival (scenario 1, scaled down): package 6 arrives at 09:05,
/// so any run whose required set includes it must start no earlier.
#[test]
fn delayed_package_forces_late_enough_start() {
    let config = Config::default();
    let mut graph = csv_loader::load_distance_graph(fixture("distance_table.csv")).unwrap();
    let mut store = csv_loader::load_packages(fixture("package_file.csv"), &mut graph, &config).unwrap();

    assert_eq!(store.gets(PackageId(6)).hub_arrival_time, NaiveTime::from_hms_opt(9, 5, 0).unwrap());

    let trucks = RouteBuilder::build_optimized_runs(&mut graph, &mut store, &config);
    for truck in trucks.values() {
        for run in &truck.runs {
            if run.required_packages.contains(&PackageId(6)) {
                assert!(run.start_time >= NaiveTime::from_hms_opt(9, 5, 0).unwrap());
            }
        }
    }
}

/// Address correction (scenario 2, scaled down): package 8 is flagged
/// "Wrong address listed" and so starts unverified; nothing may deliver it
/// before the address-change time unless it is already verified by then.
#[test]
fn unconfirmed_package_is_not_delivered_before_address_change() {
    let config = Config::default();
    let mut graph = csv_loader::load_distance_graph(fixture("distance_table.csv")).unwrap();
    let mut store = csv_loader::load_packages(fixture("package_file.csv"), &mut graph, &config).unwrap();
    assert!(!store.gets(PackageId(8)).is_verified_address);

    let trucks = RouteBuilder::build_optimized_runs(&mut graph, &mut store, &config);
    let simulator = DeliverySimulator::new(&graph, &config);
    simulator.run(trucks, &mut store, 727);

    let delivered_at = store.gets(PackageId(8)).delivery_time.unwrap();
    assert!(delivered_at >= config.package_address_change_time);
}

/// Empty planner input yields no runs and the simulator terminates
/// immediately.
#[test]
fn empty_input_yields_no_runs() {
    use parcel_dispatch::model::{location::{DistanceGraph, Location}, package::PackageStore};

    let config = Config::default();
    let eod = config.delivery_return_time;
    let mut hub = Location::new(LocationId(0), "Hub".into(), "HUB".into(), eod);
    hub.is_hub = true;
    let mut graph = DistanceGraph::from_rows(vec![hub], vec![vec![0.0]]);
    let mut store = PackageStore::new(vec![], &[], &mut graph, &config);

    let trucks = RouteBuilder::build_optimized_runs(&mut graph, &mut store, &config);
    assert!(trucks.values().all(|t| t.runs.is_empty()));

    let simulator = DeliverySimulator::new(&graph, &config);
    let trucks = simulator.run(trucks, &mut store, 1);
    assert!(trucks.values().all(|t| t.runs.is_empty()));
}
