//! A query builder scoped to a perspective (spec.md §4.4).

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::error::ClientError;
use crate::options::ConnectOptions;
use crate::remote_object::{FrameSink, HandleCore};
use crate::statement::Statement;
use crate::value::Value;

pub const TYPE_NAME: &str = "com.univedo.query";

pub struct Query {
    core: Arc<HandleCore>,
}

impl Query {
    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub async fn prepare(&self, sql: impl Into<String>) -> Result<Arc<Statement>, ClientError> {
        let result = self.core.call("prepare", vec![Value::Text(sql.into())]).await?;
        result
            .into_remote_object()
            .and_then(|r| r.downcast::<Statement>())
            .ok_or(ClientError::UnexpectedReturnType("prepare", TYPE_NAME))
    }
}

pub(crate) fn factory(
    id: u64,
    sink: Weak<dyn FrameSink>,
    _opts: &ConnectOptions,
) -> (Arc<HandleCore>, Arc<dyn Any + Send + Sync>) {
    let core = Arc::new(HandleCore::new(id, sink, HashMap::new()));
    let query = Arc::new(Query { core: core.clone() });
    (core, query)
}
