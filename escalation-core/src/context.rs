use std::sync::Arc;

use crate::channel::{CallbackChannel, PushChannel};
use crate::config::Config;
use crate::store::Datastore;

/// Everything one scheduler run needs, passed explicitly to each component.
#[derive(Clone)]
pub struct EscalationContext {
    pub config: Arc<Config>,
    pub store: Arc<dyn Datastore>,
    pub callback: Arc<dyn CallbackChannel>,
    pub push: Arc<dyn PushChannel>,
}

impl EscalationContext {
    pub fn new(
        config: Config,
        store: Arc<dyn Datastore>,
        callback: Arc<dyn CallbackChannel>,
        push: Arc<dyn PushChannel>,
    ) -> Self {
        EscalationContext {
            config: Arc::new(config),
            store,
            callback,
            push,
        }
    }
}
