//! Kernel module - orchestration infrastructure and dependencies.

pub mod agents;
pub mod deps;
pub mod http;
pub mod jobs;
pub mod nats;
pub mod test_dependencies;
pub mod topics;
pub mod traits;

pub use agents::{AgentError, AgentGateway, PromptType};
pub use deps::ArenaDeps;
pub use http::ReqwestHttpClient;
pub use nats::{BrokerMessage, MessageBroker, NatsBroker, Subscription, TestBroker};
pub use test_dependencies::{MockHttpClient, TestDependencies};
pub use traits::*;
