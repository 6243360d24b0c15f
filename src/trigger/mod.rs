pub mod aggregate;
pub mod dispatcher;
pub mod evaluator;
pub mod model;
pub mod store;
pub mod sync;

pub use dispatcher::Dispatcher;
pub use model::{Action, Conditions, Trigger, TriggerEvent, TriggerId, TriggerPatch, TriggerSpec};
pub use store::TriggerStore;
pub use sync::Synchronizer;
