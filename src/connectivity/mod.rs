pub mod link;
pub mod monitor;
pub mod probe;
pub mod state;

pub use link::{LinkLayer, NetworkCredential, WpaSupplicantLink};
pub use monitor::ConnectivityMonitor;
pub use probe::{HttpUpstreamProbe, UpstreamProbe};
pub use state::{ConnectivityState, ProbeOutcomes};
