use std::sync::Arc;

use tracing::{debug, warn};

use crate::store::{StoreClient, StoreConnector, StoreError};

/// State of the connection to the store.
pub enum Connection {
    Connected(Arc<dyn StoreClient>),
    Disconnected,
}

impl Connection {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }

    /// Returns the live client, if any.
    pub fn client(&self) -> Option<Arc<dyn StoreClient>> {
        match self {
            Self::Connected(client) => Some(client.clone()),
            Self::Disconnected => None,
        }
    }

    /// Connects if disconnected and returns the live client.
    pub async fn establish(
        &mut self,
        connector: &dyn StoreConnector,
    ) -> Result<Arc<dyn StoreClient>, StoreError> {
        if let Self::Connected(client) = self {
            return Ok(client.clone());
        }

        let client = connector.connect().await?;
        debug!("connected to the store");
        *self = Self::Connected(client.clone());
        Ok(client)
    }

    /// Closes the client and moves to `Disconnected`.
    pub async fn close(&mut self) {
        let Self::Connected(client) = std::mem::replace(self, Self::Disconnected) else {
            return;
        };

        if let Err(err) = client.close().await {
            warn!(err = ?err, "failed to close store connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;

    #[tokio::test]
    async fn test_establish_reuses_live_client() {
        let store = InMemoryStore::new();
        let mut connection = Connection::Disconnected;

        connection.establish(&store).await.expect("connect");
        connection.establish(&store).await.expect("connect");

        assert!(connection.is_connected());
        assert_eq!(store.connect_attempts().await, 1);
    }

    #[tokio::test]
    async fn test_close_disconnects() {
        let store = InMemoryStore::new();
        let mut connection = Connection::Disconnected;
        connection.establish(&store).await.expect("connect");

        connection.close().await;
        connection.close().await;

        assert!(!connection.is_connected());
        assert!(connection.client().is_none());
        assert_eq!(store.close_count().await, 1);
    }

    #[tokio::test]
    async fn test_failed_connect_stays_disconnected() {
        let store = InMemoryStore::new();
        store.fail_next_connects(1).await;
        let mut connection = Connection::Disconnected;

        let err = connection.establish(&store).await.err().expect("connect fails");
        assert!(err.is_connection());
        assert!(!connection.is_connected());
    }
}
