use std::io::{self, BufRead, Write};

use chrono::NaiveTime;

use crate::{
    logging::LogBuffer,
    model::{
        location::DistanceGraph,
        package::{PackageId, PackageStore},
    },
};

const EARLIEST_SNAPSHOT_TIME: &str = "04:00";
const LATEST_SNAPSHOT_TIME: &str = "18:59";

/// Interactive text menu: reads from `stdin` a line at a time; no
/// colorized/animated output and no `clap` dependency.
pub struct Cli<'a> {
    graph: &'a DistanceGraph,
    store: &'a PackageStore,
    log: &'a LogBuffer,
    snapshot_time: NaiveTime,
    ui_speed: u32,
}

impl<'a> Cli<'a> {
    pub fn new(graph: &'a DistanceGraph, store: &'a PackageStore, log: &'a LogBuffer, end_of_day: NaiveTime, ui_speed: u32) -> Self {
        Self {
            graph,
            store,
            log,
            snapshot_time: end_of_day,
            ui_speed,
        }
    }

    /// Runs the menu loop to completion (the user chooses `0`) or until
    /// stdin closes.
    pub fn run(&mut self) -> io::Result<()> {
        let stdin = io::stdin();
        let mut lines = stdin.lock().lines();

        println!("Welcome to the WGUPS Parcel Service Terminal");
        loop {
            println!("\nThe current time is {}", self.snapshot_time.format("%H:%M:%S"));
            println!("Please select from the options below");
            println!("1. Retrieve current status of today's packages");
            println!("2. Retrieve package information by ID");
            println!("3. Time Machine");
            println!("4. View Full \"END OF DAY\" Log");
            println!("5. Adjust UI Speed");
            println!("0. Exit");
            print!("CHOOSE ONE -> ");
            io::stdout().flush()?;

            let Some(line) = lines.next() else { break };
            match line?.trim() {
                "1" => self.print_all_statuses(),
                "2" => self.print_one_package(&mut lines)?,
                "3" => self.time_machine(&mut lines)?,
                "4" => self.dump_log(),
                "5" => self.adjust_speed(&mut lines)?,
                "0" => {
                    println!("\nBYE!");
                    break;
                }
                _ => println!("\nINVALID OPTION\n"),
            }
        }
        Ok(())
    }

    /// Option 1: every package's status snapshotted at
    /// `self.snapshot_time`, derived from `status_update_dict` rather than a
    /// re-simulation.
    fn print_all_statuses(&self) {
        for id in self.store.ids() {
            let package = self.store.gets(id);
            let location = self.graph.gets(package.location);
            match package.status_at(self.snapshot_time) {
                Some(entry) => println!(
                    "#{id:<4} {:<9?} {:<35} {}",
                    entry.status, location.address, package.deadline.format("%H:%M:%S")
                ),
                None => println!("#{id:<4} {:<9}", "unseen"),
            }
        }
    }

    /// Option 2: one package's current snapshot plus its full history up to
    /// `self.snapshot_time`, reading a package id from stdin.
    fn print_one_package(&self, lines: &mut impl Iterator<Item = io::Result<String>>) -> io::Result<()> {
        print!("ENTER ID NUMBER -> ");
        io::stdout().flush()?;
        let Some(line) = lines.next() else { return Ok(()) };
        let Ok(id) = line?.trim().parse::<u32>() else {
            println!("\nINVALID OPTION\n");
            return Ok(());
        };
        let id = PackageId(id);
        let Some(package) = self.store.get(id) else {
            println!("\nINVALID OPTION\n");
            return Ok(());
        };

        println!(
            "\n\nPackage #{id} -> {} (deadline {})",
            self.graph.gets(package.location).address,
            package.deadline.format("%H:%M:%S")
        );
        println!("\nStatus Updates");
        for (&at, entries) in package.status_update_dict.iter().rev() {
            if self.snapshot_time < at {
                continue;
            }
            for entry in entries {
                println!("{} -> {:?} at {}", at.format("%H:%M:%S"), entry.status, self.graph.gets(entry.location).address);
            }
        }
        Ok(())
    }

    /// Option 3 ("time machine"): validates `HH:MM` against
    /// `[04:00, 18:59]` and moves `self.snapshot_time` there.
    fn time_machine(&mut self, lines: &mut impl Iterator<Item = io::Result<String>>) -> io::Result<()> {
        loop {
            println!(
                "Please input a time below between \"{EARLIEST_SNAPSHOT_TIME}\"-\"{LATEST_SNAPSHOT_TIME}\" that you would like to be transport to"
            );
            print!("~EXAMPLE -> 12:45 | CHOOSE A TIME -> ");
            io::stdout().flush()?;
            let Some(line) = lines.next() else { return Ok(()) };
            let input = line?;
            match parse_time_machine_input(input.trim()) {
                Some(time) => {
                    self.snapshot_time = time;
                    println!("Transporting");
                    return Ok(());
                }
                None => println!("\nINVALID OPTION\n"),
            }
        }
    }

    /// Option 4: dumps every captured log line in emission order.
    fn dump_log(&self) {
        println!("Transporting to end of day\n\n");
        for line in self.log.lines() {
            println!("{line}");
        }
        println!("\n\nTransporting to previous time\n\n");
    }

    /// Option 5: adjusts the UI refresh speed divisor, 1-9, stored as
    /// `speed * 100`.
    fn adjust_speed(&mut self, lines: &mut impl Iterator<Item = io::Result<String>>) -> io::Result<()> {
        println!("Current Speed: {}", self.ui_speed / 100);
        loop {
            print!("Please choose a speed [1-9]: ");
            io::stdout().flush()?;
            let Some(line) = lines.next() else { return Ok(()) };
            let Ok(speed) = line?.trim().parse::<u32>() else {
                println!("\nINVALID OPTION\n");
                continue;
            };
            if speed == 0 || speed > 9 {
                println!("\nINVALID OPTION\n");
                continue;
            }
            if self.ui_speed / 100 == speed {
                println!("\nSpeed not changed");
            } else {
                println!("\nSpeed Changed to {speed}!");
                self.ui_speed = speed * 100;
            }
            return Ok(());
        }
    }
}

/// `^(0?[4-9]|1[0-8]):[0-5][0-9]$`, reimplemented
/// without a `regex` dependency, since the
/// grammar is small enough for direct parsing.
fn parse_time_machine_input(input: &str) -> Option<NaiveTime> {
    let (hour_str, minute_str) = input.split_once(':')?;
    if minute_str.len() != 2 || !minute_str.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hour: u32 = hour_str.parse().ok()?;
    let minute: u32 = minute_str.parse().ok()?;
    if !(4..=18).contains(&hour) || minute > 59 {
        return None;
    }
    NaiveTime::from_hms_opt(hour, minute, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_boundary_times() {
        assert_eq!(parse_time_machine_input("04:00"), NaiveTime::from_hms_opt(4, 0, 0));
        assert_eq!(parse_time_machine_input("18:59"), NaiveTime::from_hms_opt(18, 59, 0));
        assert_eq!(parse_time_machine_input("9:05"), NaiveTime::from_hms_opt(9, 5, 0));
    }

    #[test]
    fn rejects_out_of_range_and_malformed() {
        assert_eq!(parse_time_machine_input("19:00"), None);
        assert_eq!(parse_time_machine_input("03:59"), None);
        assert_eq!(parse_time_machine_input("12:5"), None);
        assert_eq!(parse_time_machine_input("garbage"), None);
    }
}
