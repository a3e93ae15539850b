//! Connection registry: per-connection records plus the push and close
//! primitives to a connection's transport endpoint.

use crate::backend::{from_item, to_item, Backend, Key, TableSpec};
use crate::config::{CourierConfig, HydrateOptions};
use crate::error::{CourierError, Result};
use crate::push::{PushClient, PushError};
use crate::subscriptions::SubscriptionIndex;
use crate::types::{ConnectInfo, Connection, ConnectionData, Context};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

const DATA_ATTRIBUTE: &str = "data";

pub struct ConnectionRegistry {
    backend: Arc<dyn Backend>,
    push: Arc<dyn PushClient>,
    subscriptions: Arc<SubscriptionIndex>,
    table: TableSpec,
}

impl ConnectionRegistry {
    pub fn new(
        backend: Arc<dyn Backend>,
        push: Arc<dyn PushClient>,
        subscriptions: Arc<SubscriptionIndex>,
        config: &CourierConfig,
    ) -> Self {
        Self {
            backend,
            push,
            subscriptions,
            table: TableSpec::new(config.connections_table.clone(), "id"),
        }
    }

    pub fn table(&self) -> &TableSpec {
        &self.table
    }

    /// Record a newly opened connection. Connection ids are assumed unique.
    #[instrument(skip(self, connect), fields(connection_id = %connect.connection_id))]
    pub async fn register(&self, connect: ConnectInfo) -> Result<Connection> {
        let connection = Connection {
            id: connect.connection_id,
            data: ConnectionData {
                endpoint: connect.endpoint,
                context: Context::new(),
                is_initialized: false,
            },
            created_at: Utc::now().to_rfc3339(),
        };

        self.backend.put(&self.table, to_item(&connection)?).await?;
        info!(endpoint = %connection.data.endpoint, "connection registered");
        Ok(connection)
    }

    /// Load a connection, retrying on a miss to ride out replication lag in
    /// the backing store.
    pub async fn hydrate(&self, connection_id: &str, options: HydrateOptions) -> Result<Connection> {
        let key = Key::new(connection_id);
        for attempt in 0..=options.retry_count {
            if let Some(item) = self.backend.get(&self.table, &key).await? {
                return from_item(&self.table, item);
            }
            if attempt < options.retry_count {
                debug!(connection_id, attempt, "connection not visible yet, retrying");
                tokio::time::sleep(options.timeout).await;
            }
        }
        Err(CourierError::ConnectionNotFound(connection_id.to_string()))
    }

    /// Replace the connection's data as a whole. Nothing is merged: callers
    /// pass the complete desired state, endpoint included.
    pub async fn set_data(&self, connection_id: &str, data: &ConnectionData) -> Result<()> {
        let value = serde_json::to_value(data)?;
        let updated = self
            .backend
            .update_attribute(&self.table, &Key::new(connection_id), DATA_ATTRIBUTE, value)
            .await?;
        if !updated {
            return Err(CourierError::ConnectionNotFound(connection_id.to_string()));
        }
        debug!(connection_id, is_initialized = data.is_initialized, "connection data replaced");
        Ok(())
    }

    /// Push `payload` without any cleanup. A connection that is gone for
    /// good is reported as [`CourierError::DeliveryGone`].
    pub async fn push(&self, connection: &Connection, payload: &[u8]) -> Result<()> {
        self.push
            .push(&connection.data.endpoint, &connection.id, payload)
            .await
            .map_err(|e| match e {
                PushError::Gone => CourierError::DeliveryGone(connection.id.clone()),
                PushError::Transient(reason) => {
                    CourierError::Delivery(format!("connection {}: {}", connection.id, reason))
                }
            })
    }

    /// Push `payload` to the connection.
    ///
    /// A connection reported as gone is unregistered and the call still
    /// succeeds; any other delivery failure is returned.
    pub async fn send(&self, connection: &Connection, payload: &[u8]) -> Result<()> {
        match self.push(connection, payload).await {
            Err(CourierError::DeliveryGone(_)) => {
                warn!(connection_id = %connection.id, "stale connection, unregistering");
                self.unregister(connection).await
            }
            other => other,
        }
    }

    /// Delete the connection record and sweep its subscriptions.
    ///
    /// Both steps run concurrently and must finish before this returns, but
    /// they do not commit together: a crash in between can leave orphaned
    /// subscription rows behind.
    #[instrument(skip(self, connection), fields(connection_id = %connection.id))]
    pub async fn unregister(&self, connection: &Connection) -> Result<()> {
        let key = Key::new(connection.id.as_str());
        let (_, removed) = futures::try_join!(
            self.backend.delete(&self.table, &key),
            self.subscriptions
                .unsubscribe_all_by_connection_id(&connection.id),
        )?;
        info!(subscriptions = removed, "connection unregistered");
        Ok(())
    }

    /// Ask the transport to drop the socket. A connection that is already
    /// gone counts as closed.
    pub async fn close(&self, connection: &Connection) -> Result<()> {
        match self
            .push
            .close(&connection.data.endpoint, &connection.id)
            .await
        {
            Ok(()) | Err(PushError::Gone) => Ok(()),
            Err(PushError::Transient(reason)) => Err(CourierError::Delivery(format!(
                "closing connection {}: {}",
                connection.id, reason
            ))),
        }
    }
}
