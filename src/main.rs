use parcel_dispatch::{
    cli::Cli,
    config::Config,
    csv_loader,
    logging::{self, LogBuffer},
    planner::RouteBuilder,
    simulation::DeliverySimulator,
};

const DISTANCE_CSV: &str = "data/distance_table.csv";
const PACKAGE_CSV: &str = "data/package_file.csv";
const LOAD_JITTER_SEED: u64 = 727;

fn main() -> anyhow::Result<()> {
    let log_buffer = LogBuffer::new();
    logging::init(log_buffer.clone());

    let config = Config::default();
    let mut graph = csv_loader::load_distance_graph(DISTANCE_CSV)?;
    let mut store = csv_loader::load_packages(PACKAGE_CSV, &mut graph, &config)?;

    let trucks = RouteBuilder::build_optimized_runs(&mut graph, &mut store, &config);
    let simulator = DeliverySimulator::new(&graph, &config);
    simulator.run(trucks, &mut store, LOAD_JITTER_SEED);

    Cli::new(&graph, &store, &log_buffer, config.delivery_return_time, config.ui_speed).run()?;
    Ok(())
}
