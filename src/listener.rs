//! Starts inbound listeners for registered schemes.
//!
//! With no URIs given, listens on `"<scheme>:default"` for every registered
//! scheme; an unknown scheme is skipped with a warning rather than failing
//! the whole call.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Error;
use crate::transport::TransportFactory;
use crate::uri::Uri;

pub struct ListenerSet;

impl ListenerSet {
    /// Starts listeners on `uris`, or on `"<scheme>:default"` for every
    /// registered scheme when `uris` is `None`.
    pub async fn start_listeners(
        transports: &HashMap<String, Arc<dyn TransportFactory>>,
        uris: Option<&[Uri]>,
    ) -> Result<(), Error> {
        let owned;
        let uris: &[Uri] = match uris {
            Some(uris) => uris,
            None => {
                owned = transports.keys().map(|scheme| Uri::default_for_scheme(scheme)).collect::<Vec<_>>();
                &owned
            }
        };

        for uri in uris {
            match transports.get(uri.scheme()) {
                Some(factory) => {
                    if let Err(err) = factory.listen(uri).await {
                        tracing::warn!(%uri, error = %err, "listener failed to start");
                    }
                }
                None => tracing::warn!(%uri, scheme = uri.scheme(), "no transport registered for scheme, skipping listener"),
            }
        }

        Ok(())
    }
}
