//! Driver URL parsing (spec.md §6 "Driver URL shape", §9 supplemented from
//! original_source/sql.go's `Open`).
//!
//! The relational driver adapter itself is out of scope; this is the
//! parsing step it (or a direct caller of [`crate::Connection::open`])
//! needs: `scheme://host[:port]/<bucket-uuid>/<perspective-uuid>[?k=v&...]`.

use std::collections::HashMap;

use url::Url;

use crate::error::ClientError;
use crate::options::ConnectOptions;
use crate::value::Value;

/// The parsed constituents of a driver URL.
#[derive(Debug, Clone)]
pub struct DriverUrl {
    /// The bare transport URL (path and query stripped, `/v1` appended),
    /// ready for [`crate::Connection::dial`].
    pub ws_url: Url,
    pub bucket: String,
    pub perspective: String,
    /// Query parameters, lowered into the map argument `getSession` expects.
    pub credentials: Value,
}

impl DriverUrl {
    pub fn parse(s: &str) -> Result<DriverUrl, ClientError> {
        Self::parse_with_options(s, &ConnectOptions::default())
    }

    pub fn parse_with_options(s: &str, opts: &ConnectOptions) -> Result<DriverUrl, ClientError> {
        let url = Url::parse(s)?;

        let mut segments = url
            .path_segments()
            .ok_or_else(|| ClientError::InvalidUrl("driver url has no path".to_owned()))?
            .filter(|s| !s.is_empty());
        let bucket = segments
            .next()
            .ok_or_else(|| ClientError::InvalidUrl("driver url is missing the bucket segment".to_owned()))?
            .to_owned();
        let perspective = segments
            .next()
            .ok_or_else(|| ClientError::InvalidUrl("driver url is missing the perspective segment".to_owned()))?
            .to_owned();

        let credentials = Value::Map(
            url.query_pairs()
                .map(|(k, v)| (k.into_owned(), Value::Text(v.into_owned())))
                .collect::<HashMap<_, _>>(),
        );

        let mut ws_url = url.clone();
        ws_url.set_query(None);
        ws_url.set_path(&opts.protocol_path);

        Ok(DriverUrl {
            ws_url,
            bucket,
            perspective,
            credentials,
        })
    }
}
