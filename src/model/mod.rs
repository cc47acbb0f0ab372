//! Data model (§3): the rows the persistence gateway reads and writes.
//!
//! Every type here derives `sqlx::FromRow` so the persistence gateway can
//! `query_as` directly into it, and `Serialize`/`Deserialize` so the CLI and
//! any future HTTP layer can hand the same struct to a client untouched.

pub mod credential;
pub mod device;
pub mod floorplan;
pub mod interface;
pub mod network;
pub mod scan;

pub use credential::{Credential, MatchedDevice};
pub use device::{Device, DeviceType};
pub use floorplan::{Floorplan, Location, LocationPolygon, Point};
pub use interface::{DhcpLease, Interface, Vlan};
pub use network::Network;
pub use scan::{LogLevel, Scan, ScanLog, ScanStatus};
