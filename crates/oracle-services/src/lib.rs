//! oracle-services — membership and work routing for oracle nodes.

pub mod dispatcher;
pub mod eligibility;
pub mod events;
pub mod gossip;
pub mod handlers;
pub mod node;
pub mod peer;
pub mod registry;
pub mod transport;
pub mod worker_stream;

pub use dispatcher::{execute_local, DispatchError, DispatchSettings, Dispatcher};
pub use eligibility::{eligible, eligible_ordered, Candidates};
pub use events::{DispatchEvent, EventLog};
pub use handlers::{FnHandler, HandlerMetrics, TestHandler, WorkHandler, WorkHandlerRegistry};
pub use node::{default_handlers, NodeOptions, OracleNode};
pub use peer::{Activity, CategoryStats, PeerRecord, PerformanceDelta};
pub use registry::{GossipOutcome, PeerRegistry, RegistryError, Transition};
pub use transport::{MemoryHub, MemoryTransport, Transport, TransportError, TransportEvent, WorkStream};
