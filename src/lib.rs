//! Replicates aggregate DHIS2 data values from a source instance into a
//! target instance, batching reads by org unit and writes by record count.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod fetch;
pub mod model;
pub mod period;
pub mod post;
pub mod sync;

#[cfg(test)]
mod test_util;

pub use config::SyncConfig;
pub use error::{ErrorKind, SyncError};
pub use events::{LogEvents, Stage, SyncEvents};
pub use model::{DataPoint, DataPointTable, DataValue};
pub use sync::{SyncReport, Synchronizer};
