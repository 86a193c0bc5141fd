use thiserror::Error;

use crate::model::{location::LocationId, package::PackageId, truck::TruckId};

/// Tagged verdicts raised by the planner and the simulator.
///
/// `OptimalHubReturn` is deliberately not a variant here: it is an accepted
/// refinement of a run, not a failure, and lives in [`RunTag`] instead.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RunError {
    #[error("package {package} at {location:?} has not arrived at the hub by the run's start time")]
    PackageNotArrived {
        package: PackageId,
        location: LocationId,
    },

    #[error("run would arrive at {location:?} after its earliest deadline")]
    LateDelivery { location: LocationId },

    #[error("run would deliver unconfirmed package {package} at {location:?} before its address update")]
    UnconfirmedPackageDelivery {
        package: PackageId,
        location: LocationId,
    },

    #[error("truck {truck} would exceed its capacity")]
    TruckCapacityExceeded { truck: TruckId },

    #[error("run contains packages with conflicting assigned truck ids at {location:?}")]
    InvalidRouteRun { location: LocationId },

    #[error("runs on truck {truck} overlap in time")]
    OverlappingRouteRun { truck: TruckId },

    #[error("bundle containing package {package} would be split across trucks")]
    BundledPackageTruckAssignment { package: PackageId },

    #[error("attempted to deliver package {package} that truck {truck} does not hold")]
    PackageNotOnTruck { package: PackageId, truck: TruckId },
}

impl RunError {
    /// Recoverable errors let the caller retry with a new `start_time`;
    /// everything else is fatal for that run construction.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            RunError::PackageNotArrived { .. } | RunError::UnconfirmedPackageDelivery { .. }
        )
    }
}

/// Refinements accepted as part of a successful run, not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTag {
    OptimalHubReturn { after_location: LocationId },
}

/// Non-error signals raised during simulation ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimSignal {
    DelayedPackagesArrived,
    AddressUpdate { package: PackageId },
}
