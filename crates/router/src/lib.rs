//! # Helmsman Router
//!
//! Turns a system prompt plus conversation history into a
//! [`helmsman_core::Decision`]:
//!
//! 1. **Cache**: identical requests against the same model are answered from memory
//! 2. **Batching**: concurrent requests sharing a system prompt are merged into one call
//! 3. **Failover**: providers are tried in configured order until one answers
//! 4. **Parsing**: loosely structured model text becomes a typed decision
//! 5. **Shaping**: post-processing applied identically to cached and live output

pub mod backends;
pub mod batch;
pub mod cache;
pub mod credentials;
pub mod failover;
pub mod parser;
pub mod router;
pub mod shaper;

pub use batch::{BatchSettings, Batcher};
pub use cache::ResponseCache;
pub use failover::FailoverChain;
pub use router::ModelRouter;
pub use shaper::{OutputShaper, PersonaShaper};
