use std::sync::Arc;

use serde_json::Value;
use url::Url;

use super::request::{Request, Response};
use crate::Result;
use crate::error::Error;
use crate::host::{DEFAULT_NOTIFICATION_TITLE, Disposition, Host, Notification};
use crate::registry::{MessageSink, SubscriberRegistry};
use crate::store::KeyValueStore;
use crate::types::ConsumerId;
use crate::ws::{Config, Connection};

/// Single entry point for consumer requests.
///
/// Owns the [`SubscriberRegistry`] and the [`Connection`] that broadcasts
/// through it, and routes store and host operations to their backends.
pub struct ControlSurface {
    connection: Connection,
    registry: Arc<SubscriberRegistry>,
    store: Arc<dyn KeyValueStore>,
    host: Arc<dyn Host>,
}

impl ControlSurface {
    /// Build the registry over `sink` and start the connection supervisor.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(
        config: Config,
        sink: Arc<dyn MessageSink>,
        store: Arc<dyn KeyValueStore>,
        host: Arc<dyn Host>,
    ) -> Self {
        let registry = Arc::new(SubscriberRegistry::new(sink));
        let connection = Connection::new(config, Arc::clone(&registry));

        Self {
            connection,
            registry,
            store,
            host,
        }
    }

    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Decode and handle a request in its JSON form.
    pub async fn handle_json(&self, caller: Option<ConsumerId>, request: Value) -> Response {
        match Request::from_value(request) {
            Ok(request) => self.handle(caller, request).await,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(?caller, error = %e, "Rejected request");
                Response::failed(&e)
            }
        }
    }

    /// Handle one request on behalf of `caller`.
    ///
    /// Subscription requests without a caller succeed without effect.
    pub async fn handle(&self, caller: Option<ConsumerId>, request: Request) -> Response {
        #[cfg(feature = "tracing")]
        tracing::debug!(?caller, operation = request.operation(), "Request");

        match self.dispatch(caller, request).await {
            Ok(response) => response,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(?caller, error = %e, "Request failed");
                Response::failed(&e)
            }
        }
    }

    /// Forget a consumer that went away.
    pub fn consumer_destroyed(&self, consumer: ConsumerId) {
        self.registry.remove(consumer);
    }

    async fn dispatch(&self, caller: Option<ConsumerId>, request: Request) -> Result<Response> {
        let response = match request {
            Request::GetValue { key, default } => {
                let value = match self.store.get(&key).await {
                    Ok(Some(value)) => value,
                    Ok(None) => default.unwrap_or(Value::Null),
                    Err(e) => {
                        store_failed("get", &e);
                        default.unwrap_or(Value::Null)
                    }
                };
                Response::with_value(value)
            }
            Request::SetValue { key, value } => match self.store.set(&key, value).await {
                Ok(()) => Response::ok(),
                Err(e) => {
                    store_failed("set", &e);
                    Response::rejected()
                }
            },
            Request::DeleteValue { key } => match self.store.delete(&key).await {
                Ok(()) => Response::ok(),
                Err(e) => {
                    store_failed("delete", &e);
                    Response::rejected()
                }
            },
            Request::ListKeys => {
                let keys = self.store.list_keys().await.unwrap_or_else(|e| {
                    store_failed("list", &e);
                    Vec::new()
                });
                Response::with_value(Value::from(keys))
            }
            Request::OpenUrl { url, background } => {
                let url = parse_url(&url)?;
                let disposition = if background {
                    Disposition::Background
                } else {
                    Disposition::Foreground
                };
                self.host.open_url(&url, disposition)?;
                Response::ok()
            }
            Request::Notify { title, text } => {
                let notification = Notification::new(
                    title.unwrap_or_else(|| DEFAULT_NOTIFICATION_TITLE.to_owned()),
                    text.unwrap_or_default(),
                );
                self.host.notify(&notification)?;
                Response::ok()
            }
            Request::Subscribe => {
                if let Some(consumer) = caller {
                    self.registry.add(consumer);
                }
                Response::ok()
            }
            Request::Unsubscribe => {
                if let Some(consumer) = caller {
                    self.registry.remove(consumer);
                }
                Response::ok()
            }
            Request::SendCommand { command } => {
                Response::from_bool(self.connection.send(command).await?)
            }
            Request::SetEndpoint { url } => {
                self.connection.set_endpoint(parse_endpoint(&url)?)?;
                Response::ok()
            }
            Request::Connect { url } => {
                let endpoint = url.as_deref().map(parse_endpoint).transpose()?;
                self.connection.connect(endpoint)?;
                Response::ok()
            }
            Request::Disconnect => {
                self.connection.disconnect()?;
                Response::ok()
            }
            Request::Status => {
                let status = self.connection.status().await?;
                Response::with_value(serde_json::to_value(status)?)
            }
            request @ Request::Unrecognized => {
                return Err(Error::unrecognized_operation(request.operation()));
            }
        };

        Ok(response)
    }
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| Error::validation(format!("invalid url {raw:?}: {e}")))
}

/// Validate an engine endpoint, returning it unchanged.
fn parse_endpoint(raw: &str) -> Result<String> {
    let url = parse_url(raw)?;
    match url.scheme() {
        "ws" | "wss" => Ok(raw.to_owned()),
        scheme => Err(Error::validation(format!(
            "invalid endpoint {raw:?}: expected ws or wss, got {scheme}"
        ))),
    }
}

fn store_failed(operation: &str, error: &Error) {
    #[cfg(feature = "tracing")]
    tracing::warn!(operation, %error, "Key-value store failed");
    #[cfg(not(feature = "tracing"))]
    let _ = (operation, error);
}
