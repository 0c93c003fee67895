//! The root session handle (spec.md §4.4). Returned from `call("getSession",
//! ...)` on the login object (id 0).

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use crate::error::ClientError;
use crate::options::ConnectOptions;
use crate::perspective::Perspective;
use crate::remote_object::{FrameSink, HandleCore};
use crate::value::Value;

pub const TYPE_NAME: &str = "com.univedo.session";

pub struct Session {
    core: Arc<HandleCore>,
}

impl Session {
    pub fn id(&self) -> u64 {
        self.core.id
    }

    /// Echoes `v` back through the server; mostly useful as a liveness probe.
    pub async fn ping(&self, v: Value) -> Result<Value, ClientError> {
        Ok(self.core.call("ping", vec![v]).await?)
    }

    /// Applies an opaque schema/definition blob to this session.
    pub async fn apply_uts(&self, uts: impl Into<String>) -> Result<(), ClientError> {
        self.core.call("applyUts", vec![Value::Text(uts.into())]).await?;
        Ok(())
    }

    pub async fn get_perspective(&self, uuid_text: impl Into<String>) -> Result<Arc<Perspective>, ClientError> {
        let result = self
            .core
            .call("getPerspective", vec![Value::Text(uuid_text.into())])
            .await?;
        result
            .into_remote_object()
            .and_then(|r| r.downcast::<Perspective>())
            .ok_or(ClientError::UnexpectedReturnType("getPerspective", TYPE_NAME))
    }
}

pub(crate) fn factory(
    id: u64,
    sink: Weak<dyn FrameSink>,
    _opts: &ConnectOptions,
) -> (Arc<HandleCore>, Arc<dyn Any + Send + Sync>) {
    let core = Arc::new(HandleCore::new(id, sink, HashMap::new()));
    let session = Arc::new(Session { core: core.clone() });
    (core, session)
}
