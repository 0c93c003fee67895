//! Client library for the univedo remote database service.
//!
//! A framed message transport carries a small remote-object protocol: every
//! operation is a method call or a notification directed at a specific
//! remote object identified by a numeric id. [`codec`] is the wire format,
//! [`remote_object`] and [`connection`] are the dispatcher, and
//! [`session`]/[`perspective`]/[`query`]/[`statement`]/[`result`] are the
//! typed handles layered on top.
//!
//! The crate never installs a `tracing` subscriber; wire it up in the
//! consuming application.

pub mod codec;
pub mod connection;
pub mod driver_url;
pub mod error;
pub mod options;
pub mod perspective;
pub mod query;
pub mod registry;
pub mod remote_object;
pub mod result;
pub mod session;
pub mod slot;
pub mod statement;
pub mod transport;
pub mod value;

pub use connection::Connection;
pub use driver_url::DriverUrl;
pub use error::ClientError;
pub use options::ConnectOptions;
pub use perspective::Perspective;
pub use query::Query;
pub use result::ResultObject;
pub use session::Session;
pub use statement::Statement;
pub use value::{RemoteObjectRef, Value};
