//! A named view over a data store (spec.md §4.4, GLOSSARY "Perspective").

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::error::ClientError;
use crate::options::ConnectOptions;
use crate::query::Query;
use crate::remote_object::{FrameSink, HandleCore};

pub const TYPE_NAME: &str = "com.univedo.perspective";

pub struct Perspective {
    core: Arc<HandleCore>,
}

impl Perspective {
    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub async fn query(&self) -> Result<Arc<Query>, ClientError> {
        let result = self.core.call("query", vec![]).await?;
        result
            .into_remote_object()
            .and_then(|r| r.downcast::<Query>())
            .ok_or(ClientError::UnexpectedReturnType("query", TYPE_NAME))
    }
}

pub(crate) fn factory(
    id: u64,
    sink: Weak<dyn FrameSink>,
    _opts: &ConnectOptions,
) -> (Arc<HandleCore>, Arc<dyn Any + Send + Sync>) {
    let core = Arc::new(HandleCore::new(id, sink, HashMap::new()));
    let perspective = Arc::new(Perspective { core: core.clone() });
    (core, perspective)
}
