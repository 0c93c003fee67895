//! Process-wide factory registry: type-name → constructor for a typed
//! remote-object handle (spec.md §4.3, §9 "Factory registry").
//!
//! Populated once, at first use, with the built-in domain types. Lookups at
//! steady state are read-only; `register` exists for callers who want to
//! extend the table with their own types before connecting.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex, Weak};

use crate::options::ConnectOptions;
use crate::remote_object::{FrameSink, HandleCore};
use crate::{perspective, query, result, session, statement};

/// Builds the `HandleCore` (with its notification handlers already wired
/// up) and the type-erased typed wrapper stored in a `RemoteObjectRef`.
pub type Factory =
    fn(id: u64, sink: Weak<dyn FrameSink>, opts: &ConnectOptions) -> (Arc<HandleCore>, Arc<dyn Any + Send + Sync>);

static REGISTRY: LazyLock<Mutex<HashMap<&'static str, Factory>>> = LazyLock::new(|| {
    let mut map: HashMap<&'static str, Factory> = HashMap::new();
    map.insert(session::TYPE_NAME, session::factory);
    map.insert(perspective::TYPE_NAME, perspective::factory);
    map.insert(query::TYPE_NAME, query::factory);
    map.insert(statement::TYPE_NAME, statement::factory);
    map.insert(result::TYPE_NAME, result::factory);
    Mutex::new(map)
});

/// Registers (or overrides) the factory for `type_name`. Intended to be
/// called during application initialization, before any connection exists.
pub fn register(type_name: &'static str, factory: Factory) {
    REGISTRY.lock().unwrap().insert(type_name, factory);
}

/// Looks up the factory for `type_name`, if one is registered.
pub fn lookup(type_name: &str) -> Option<Factory> {
    REGISTRY.lock().unwrap().get(type_name).copied()
}

/// The fallback for any type-name with no registered factory: a bare
/// `HandleCore` with no notification handlers, type-erased as itself.
pub fn generic_factory(
    id: u64,
    sink: Weak<dyn FrameSink>,
    _opts: &ConnectOptions,
) -> (Arc<HandleCore>, Arc<dyn Any + Send + Sync>) {
    let core = Arc::new(HandleCore::new(id, sink, HashMap::new()));
    let any: Arc<dyn Any + Send + Sync> = core.clone();
    (core, any)
}
