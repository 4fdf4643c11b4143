pub mod channel;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod memory_store;
pub mod models;
pub mod pg_store;
pub mod schema;
pub mod store;
pub mod types;

pub use channel::{
    CallbackChannel, CallbackPayload, CallbackResponse, PushAction, PushChannel,
    PushNotification, PushReport,
};
pub use config::Config;
pub use context::EscalationContext;
pub use db::DbPool;
pub use error::{DeliveryError, StoreError, StoreResult};
#[cfg(any(test, feature = "test-util"))]
pub use memory_store::FailPoint;
pub use memory_store::MemoryStore;
pub use pg_store::PgStore;
pub use store::{Datastore, OverdueQuery};
