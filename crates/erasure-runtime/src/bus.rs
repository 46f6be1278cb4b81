//! A weak handle to the dispatcher that handlers use to emit follow-on events
//! without creating an `Arc` reference cycle (`Dispatcher` owns the handlers;
//! handlers need to talk back to the `Dispatcher`).

use std::sync::{Arc, Weak};

use erasure_common::BusEvent;

use crate::dispatcher::{DispatchError, Dispatcher};

#[derive(Clone)]
pub struct Bus {
    dispatcher: Weak<Dispatcher>,
}

impl Bus {
    pub fn new(dispatcher: &Arc<Dispatcher>) -> Self {
        Self {
            dispatcher: Arc::downgrade(dispatcher),
        }
    }

    pub async fn emit(&self, event: BusEvent) -> anyhow::Result<()> {
        let dispatcher = self
            .dispatcher
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("dispatcher has been shut down"))?;
        dispatcher.emit(event).await.map_err(to_anyhow)
    }
}

fn to_anyhow(err: DispatchError) -> anyhow::Error {
    anyhow::anyhow!(err)
}
