//! The resource operation pipeline (spec §4.5): schema + behavior + hooks
//! over a logical collection of records, built on top of [`objectdb_codec`],
//! [`objectdb_partition`], and [`objectdb_events`].

mod batch;
mod cache;
mod context;
mod filter;
mod hooks;
mod record;
mod resource;
mod stream;

pub use batch::{run_batch, BatchOutcome};
pub use context::OpContext;
pub use filter::Filter;
pub use hooks::{Hook, HookPhase, HookRegistry};
pub use record::{generate_id, Record};
pub use resource::{Resource, ResourceConfig};
pub use stream::StreamingIterator;
