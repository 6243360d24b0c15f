pub mod broadcaster;
pub mod netflow;
pub mod record;
pub mod store;
pub mod window;

pub use broadcaster::{FlowBroadcaster, FlowStreamMessage};
pub use netflow::parse_netflow;
pub use record::{enrich, EnrichedFlow, FlowKey, FlowRecord};
pub use store::{Counters, FlowStore, Metric};
pub use window::{AggregateStats, TrafficWindow};
