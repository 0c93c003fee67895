//! A prepared statement (spec.md §4.4, §4.5 "Column names are delivered...
//! on the statement via a notification that arrives before the server
//! completes `execute`").

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::error::{ClientError, ResultError};
use crate::options::ConnectOptions;
use crate::remote_object::{ClosedSignal, FrameSink, HandleCore};
use crate::result::ResultObject;
use crate::slot::SingleShotSlot;
use crate::value::Value;

pub const TYPE_NAME: &str = "com.univedo.statement";

pub struct Statement {
    core: Arc<HandleCore>,
    closed: ClosedSignal,
    column_names: Arc<SingleShotSlot<Vec<String>>>,
}

impl Statement {
    pub fn id(&self) -> u64 {
        self.core.id
    }

    pub async fn execute(&self, binds: HashMap<String, Value>) -> Result<Arc<ResultObject>, ClientError> {
        let result = self.core.call("execute", vec![Value::Map(binds)]).await?;
        result
            .into_remote_object()
            .and_then(|r| r.downcast::<ResultObject>())
            .ok_or(ClientError::UnexpectedReturnType("execute", TYPE_NAME))
    }

    /// The column names published before `execute` completes. Single-read,
    /// like the result's `last_inserted_id`/`rows_affected`.
    pub async fn columns(&self) -> Result<Vec<String>, ResultError> {
        self.column_names.read_once(&self.closed).await
    }
}

pub(crate) fn factory(
    id: u64,
    sink: Weak<dyn FrameSink>,
    _opts: &ConnectOptions,
) -> (Arc<HandleCore>, Arc<dyn Any + Send + Sync>) {
    let closed = sink
        .upgrade()
        .map(|s| s.closed_signal())
        .unwrap_or_else(ClosedSignal::new);
    let column_names: Arc<SingleShotSlot<Vec<String>>> = Arc::new(SingleShotSlot::new());

    let mut handlers: HashMap<String, crate::remote_object::NotificationHandler> = HashMap::new();

    let slot = column_names.clone();
    handlers.insert(
        "setColumnNames".to_string(),
        Box::new(move |args: Vec<Value>| {
            let names = args
                .into_iter()
                .next()
                .and_then(Value::into_array)
                .unwrap_or_default()
                .into_iter()
                .filter_map(Value::into_text)
                .collect();
            slot.publish(names);
        }),
    );
    // present in the wire vocabulary, no downstream consumer here.
    handlers.insert("setColumnTypes".to_string(), Box::new(|_args: Vec<Value>| {}));

    let core = Arc::new(HandleCore::new(id, sink, handlers));
    let statement = Arc::new(Statement {
        core: core.clone(),
        closed,
        column_names,
    });
    (core, statement)
}
