use std::path::Path;

use anyhow::{anyhow, Context};
use chrono::NaiveTime;
use serde::Deserialize;

use crate::{
    config::Config,
    model::{
        location::{DistanceGraph, Location, LocationId},
        package::{Package, PackageId, PackageStore},
        truck::TruckId,
    },
};

/// Parses the grid-style distance table.
///
/// The header row's columns 2.. carry each location's "Name\nAddress"
/// multi-line cell; every following row repeats the name/address pair in
/// its first two columns and then a ragged, lower-triangular run of
/// distances. The row whose address column reads "HUB" designates the hub.
pub fn load_distance_graph(path: impl AsRef<Path>) -> anyhow::Result<DistanceGraph> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("reading distance CSV at {}", path.display()))?;

    let mut records = reader.records();
    let header = records
        .next()
        .ok_or_else(|| anyhow!("distance CSV is empty"))??;

    let mut locations = Vec::new();
    for (i, cell) in header.iter().enumerate().skip(2) {
        let mut lines = cell.split('\n');
        let name = lines.next().unwrap_or_default().trim().to_string();
        let address_line = lines.next().unwrap_or_default().trim();
        let address = trim_trailing_punctuation(address_line).to_string();
        locations.push(Location::new(
            LocationId((i - 2) as u32),
            name,
            address,
            NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
        ));
    }

    let mut distance_rows: Vec<Vec<f64>> = Vec::new();
    let mut hub_index = None;
    for (i, record) in records.enumerate() {
        let record = record?;
        let fields: Vec<&str> = record.iter().collect();
        let address_zip = fields.get(1).copied().unwrap_or_default().trim();
        if address_zip == "HUB" {
            hub_index = Some(i);
        }
        if let Some(zip) = extract_parenthesized_zip(address_zip) {
            locations[i].zip_code = Some(zip);
        }
        let row: Vec<f64> = fields[2..]
            .iter()
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .with_context(|| format!("parsing distance row {i}"))?;
        distance_rows.push(row);
    }

    let n = locations.len();
    let mut matrix = vec![vec![0.0_f64; n]; n];
    for (i, row) in distance_rows.iter().enumerate() {
        for (j, &value) in row.iter().enumerate() {
            matrix[i][j] = value;
            matrix[j][i] = value;
        }
    }
    if let Some(hub_index) = hub_index {
        locations[hub_index].is_hub = true;
    } else {
        return Err(anyhow!("distance CSV does not designate a HUB row"));
    }

    Ok(DistanceGraph::from_rows(locations, matrix))
}

fn trim_trailing_punctuation(s: &str) -> &str {
    let trimmed = s.trim();
    match trimmed.chars().last() {
        Some(c) if !c.is_alphanumeric() => &trimmed[..trimmed.len() - c.len_utf8()],
        _ => trimmed,
    }
}

fn extract_parenthesized_zip(s: &str) -> Option<u32> {
    let open = s.find('(')?;
    let close = s[open..].find(')')? + open;
    s[open + 1..close].parse().ok()
}

#[derive(Debug, Deserialize)]
struct PackageRecord {
    #[serde(rename = "Package ID")]
    package_id: u32,
    #[serde(rename = "Address")]
    address: String,
    #[serde(rename = "Zip")]
    zip: u32,
    #[serde(rename = "Delivery Deadline")]
    deadline: String,
    #[serde(rename = "Mass KILO")]
    weight: u32,
    #[serde(rename = "Special Notes")]
    special_notes: String,
}

/// Parses the flat package CSV, pulling the delayed-arrival time and
/// assigned-truck constraint out of the free-text special notes column.
///
/// Returns the built [`PackageStore`] plus the raw bundle edges (callers
/// typically hand both straight to `PackageStore::new`, which is why this
/// helper does the special-note parsing but not the union-find itself).
pub fn load_packages(
    path: impl AsRef<Path>,
    graph: &mut DistanceGraph,
    config: &Config,
) -> anyhow::Result<PackageStore> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("reading package CSV at {}", path.display()))?;

    let mut packages = Vec::new();
    let mut bundle_edges = Vec::new();

    for record in reader.deserialize() {
        let record: PackageRecord = record?;
        let package_id = PackageId(record.package_id);

        let location_id = graph
            .iter()
            .find(|(_, loc)| loc.address == record.address.trim())
            .map(|(&id, _)| id)
            .ok_or_else(|| anyhow!("no location matches package {package_id} address '{}'", record.address))?;

        let deadline = if record.deadline.trim().eq_ignore_ascii_case("EOD") {
            config.delivery_return_time
        } else {
            NaiveTime::parse_from_str(record.deadline.trim(), "%I:%M:%S %p")
                .with_context(|| format!("parsing deadline for package {package_id}"))?
        };

        let is_verified_address = !record.special_notes.starts_with("Wrong address");
        let hub_arrival_time = parse_delayed_arrival(&record.special_notes)
            .unwrap_or(config.standard_package_arrival_time);
        let assigned_truck_id = parse_assigned_truck(&record.special_notes);

        for peer in parse_bundle_peers(&record.special_notes) {
            bundle_edges.push((package_id, PackageId(peer)));
        }

        let zip_matches = graph.gets(location_id).zip_code == Some(record.zip);
        debug_assert!(zip_matches, "package {package_id} zip does not match its location");

        packages.push(Package::new(
            package_id,
            location_id,
            is_verified_address,
            deadline,
            record.weight,
            record.special_notes,
            hub_arrival_time,
            assigned_truck_id,
        ));
    }

    Ok(PackageStore::new(packages, &bundle_edges, graph, config))
}

fn parse_delayed_arrival(note: &str) -> Option<NaiveTime> {
    if !note.starts_with("Delayed") {
        return None;
    }
    let digits_start = note.find(|c: char| c.is_ascii_digit())?;
    let rest = &note[digits_start..];
    let colon = rest.find(':')?;
    let hour: u32 = rest[..colon].trim().parse().ok()?;
    let after_colon = &rest[colon + 1..];
    let minute: u32 = after_colon.get(..2)?.parse().ok()?;
    let meridiem = after_colon.to_ascii_lowercase();
    let is_pm = meridiem.contains("pm");
    let is_am = meridiem.contains("am");
    let hour24 = match (hour, is_pm, is_am) {
        (12, false, true) => 0,
        (h, true, false) if h != 12 => h + 12,
        (h, _, _) => h,
    };
    NaiveTime::from_hms_opt(hour24, minute, 0)
}

fn parse_assigned_truck(note: &str) -> Option<TruckId> {
    const PREFIX: &str = "Can only be on truck ";
    if !note.starts_with(PREFIX) {
        return None;
    }
    note[PREFIX.len()..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .ok()
        .map(TruckId)
}

fn parse_bundle_peers(note: &str) -> Vec<u32> {
    const PREFIX: &str = "Must be delivered with ";
    if !note.starts_with(PREFIX) {
        return Vec::new();
    }
    note[PREFIX.len()..]
        .split(',')
        .filter_map(|part| part.trim().chars().filter(|c| c.is_ascii_digit()).collect::<String>().parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_delayed_arrival_time() {
        let note = "Delayed on flight\u{2014}will not arrive to depot until 9:05 am";
        let t = parse_delayed_arrival(note).unwrap();
        assert_eq!(t, NaiveTime::from_hms_opt(9, 5, 0).unwrap());
    }

    #[test]
    fn parses_assigned_truck() {
        assert_eq!(parse_assigned_truck("Can only be on truck 2"), Some(TruckId(2)));
        assert_eq!(parse_assigned_truck("Wrong address listed"), None);
    }

    #[test]
    fn parses_bundle_peers() {
        assert_eq!(
            parse_bundle_peers("Must be delivered with 14, 15, 16, 19, 20"),
            vec![14, 15, 16, 19, 20]
        );
    }

    #[test]
    fn extracts_zip_from_parens() {
        assert_eq!(extract_parenthesized_zip("Salt Lake City, UT (84111)"), Some(84111));
        assert_eq!(extract_parenthesized_zip("HUB"), None);
    }
}
