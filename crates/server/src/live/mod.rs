//! Live conversations: who is running, and who is watching.

pub mod events;
pub mod feed;
pub mod hub;
pub mod registry;

pub use events::{ControlEvent, PermissionRequest, ProcessMessage, ProcessMessageKind, StreamEvent};
pub use feed::{spawn_feed_consumer, FeedConsumer, FeedEvent};
pub use hub::{HubMessage, StreamHub, StreamSink};
pub use registry::{RegistryEvent, SessionContext, SessionRegistry};
