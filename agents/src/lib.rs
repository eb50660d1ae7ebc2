pub mod cluster;
pub mod context;
pub mod tasks;
pub mod placement;
pub mod resolver;
pub mod strategy;
pub mod starter;
pub mod random;
pub mod turn;

mod tests;

pub use cluster::{ClusterSet, ResourceCluster};
pub use context::{AgentMemory, Roles, TurnContext};
pub use random::RandomWalkStrategy;
pub use starter::StarterStrategy;
pub use strategy::{Strategy, StrategyKind};
pub use tasks::TaskError;
pub use turn::Agent;
