use battle_types::{BattleId, PlayerProfile, ServerMessage};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub player: Option<PlayerProfile>,
    pub battle_id: Option<BattleId>,
    pub connected_at: Instant,
    pub last_activity: Instant,
    pub sender: mpsc::UnboundedSender<ServerMessage>,
}

impl Connection {
    pub fn new(id: ConnectionId) -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let now = Instant::now();

        let connection = Self {
            id,
            player: None,
            battle_id: None,
            connected_at: now,
            last_activity: now,
            sender,
        };

        (connection, receiver)
    }

    pub fn update_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn player_id(&self) -> Option<&str> {
        self.player.as_ref().map(|p| p.id.as_str())
    }

    pub fn send_message(&self, message: ServerMessage) -> Result<(), String> {
        self.sender
            .send(message)
            .map_err(|_| "Connection closed".to_string())
    }

    pub fn is_inactive(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }
}

pub struct ConnectionManager {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    player_to_connection: RwLock<HashMap<String, ConnectionId>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            player_to_connection: RwLock::new(HashMap::new()),
        }
    }

    pub async fn create_connection(
        &self,
        id: ConnectionId,
    ) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (conn, receiver) = Connection::new(id);

        {
            let mut connections = self.connections.write().await;
            connections.insert(id, conn);
        }

        receiver
    }

    pub async fn remove_connection(&self, id: ConnectionId) {
        let player_id = {
            let mut connections = self.connections.write().await;
            connections
                .remove(&id)
                .and_then(|conn| conn.player.map(|p| p.id))
        };

        if let Some(player_id) = player_id {
            let mut player_to_connection = self.player_to_connection.write().await;
            // Only drop the mapping if it still points at this connection
            if player_to_connection.get(&player_id) == Some(&id) {
                player_to_connection.remove(&player_id);
            }
        }
    }

    pub async fn get_connection(&self, id: ConnectionId) -> Option<Connection> {
        let connections = self.connections.read().await;
        connections.get(&id).cloned()
    }

    /// Attach a player identity to a connection. One live connection per player.
    pub async fn identify_connection(
        &self,
        id: ConnectionId,
        profile: PlayerProfile,
    ) -> Result<(), String> {
        let mut player_to_connection = self.player_to_connection.write().await;
        if let Some(existing) = player_to_connection.get(&profile.id) {
            if *existing != id {
                return Err("Player already connected".to_string());
            }
        }

        let previous = {
            let mut connections = self.connections.write().await;
            let connection = connections
                .get_mut(&id)
                .ok_or_else(|| "Connection not found".to_string())?;
            connection.player.replace(profile.clone())
        };

        if let Some(previous) = previous {
            if previous.id != profile.id {
                player_to_connection.remove(&previous.id);
            }
        }
        player_to_connection.insert(profile.id, id);

        Ok(())
    }

    pub async fn update_activity(&self, id: ConnectionId) {
        let mut connections = self.connections.write().await;
        if let Some(connection) = connections.get_mut(&id) {
            connection.update_activity();
        }
    }

    pub async fn set_connection_battle(&self, id: ConnectionId, battle_id: Option<BattleId>) {
        let mut connections = self.connections.write().await;
        if let Some(connection) = connections.get_mut(&id) {
            connection.battle_id = battle_id;
        }
    }

    pub async fn send_to_connection(
        &self,
        id: ConnectionId,
        message: ServerMessage,
    ) -> Result<(), String> {
        let connections = self.connections.read().await;
        if let Some(connection) = connections.get(&id) {
            connection.send_message(message)
        } else {
            Err("Connection not found".to_string())
        }
    }

    /// Remove connections idle for longer than `timeout`. Returns the removed ids.
    pub async fn cleanup_inactive_connections(&self, timeout: Duration) -> Vec<ConnectionId> {
        let inactive_connections: Vec<ConnectionId> = {
            let connections = self.connections.read().await;
            connections
                .values()
                .filter(|conn| conn.is_inactive(timeout))
                .map(|conn| conn.id)
                .collect()
        };

        for connection_id in &inactive_connections {
            tracing::info!("Removing inactive connection: {}", connection_id);
            self.remove_connection(*connection_id).await;
        }

        inactive_connections
    }

    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    pub async fn player_connection_count(&self) -> usize {
        let player_connections = self.player_to_connection.read().await;
        player_connections.len()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str) -> PlayerProfile {
        PlayerProfile {
            id: id.to_string(),
            display_name: id.to_uppercase(),
            avatar_ref: None,
        }
    }

    #[tokio::test]
    async fn test_connection_creation_and_removal() {
        let manager = ConnectionManager::new();
        let conn_id = ConnectionId::new();

        let _receiver = manager.create_connection(conn_id).await;
        assert_eq!(manager.connection_count().await, 1);

        manager.remove_connection(conn_id).await;
        assert_eq!(manager.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_identify_prevents_duplicate_players() {
        let manager = ConnectionManager::new();
        let conn_id1 = ConnectionId::new();
        let conn_id2 = ConnectionId::new();

        let _receiver1 = manager.create_connection(conn_id1).await;
        let _receiver2 = manager.create_connection(conn_id2).await;

        assert!(manager.identify_connection(conn_id1, profile("alice")).await.is_ok());

        let result = manager.identify_connection(conn_id2, profile("alice")).await;
        assert_eq!(result.unwrap_err(), "Player already connected");

        // Re-identifying the same connection is fine
        assert!(manager.identify_connection(conn_id1, profile("alice")).await.is_ok());
        assert_eq!(manager.player_connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_reidentify_releases_old_player() {
        let manager = ConnectionManager::new();
        let conn_id = ConnectionId::new();
        let _receiver = manager.create_connection(conn_id).await;

        manager.identify_connection(conn_id, profile("alice")).await.unwrap();
        manager.identify_connection(conn_id, profile("bob")).await.unwrap();

        assert_eq!(manager.player_connection_count().await, 1);
        let connection = manager.get_connection(conn_id).await.unwrap();
        assert_eq!(connection.player_id(), Some("bob"));
    }

    #[tokio::test]
    async fn test_identity_cleanup_on_disconnect() {
        let manager = ConnectionManager::new();
        let conn_id = ConnectionId::new();

        let _receiver = manager.create_connection(conn_id).await;
        manager.identify_connection(conn_id, profile("alice")).await.unwrap();
        assert_eq!(manager.player_connection_count().await, 1);

        manager.remove_connection(conn_id).await;
        assert_eq!(manager.connection_count().await, 0);
        assert_eq!(manager.player_connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_activity_tracking_and_timeout() {
        let manager = ConnectionManager::new();
        let conn_id = ConnectionId::new();

        let _receiver = manager.create_connection(conn_id).await;

        let short_timeout = Duration::from_millis(10);
        assert!(manager.cleanup_inactive_connections(short_timeout).await.is_empty());
        assert_eq!(manager.connection_count().await, 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let removed = manager.cleanup_inactive_connections(short_timeout).await;
        assert_eq!(removed, vec![conn_id]);
        assert_eq!(manager.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_message_sending_after_connection_close() {
        let manager = ConnectionManager::new();
        let conn_id = ConnectionId::new();

        let missing = manager
            .send_to_connection(
                ConnectionId::new(),
                ServerMessage::Error {
                    message: "test".to_string(),
                },
            )
            .await;
        assert_eq!(missing.unwrap_err(), "Connection not found");

        let receiver = manager.create_connection(conn_id).await;
        drop(receiver);

        let result = manager
            .send_to_connection(
                conn_id,
                ServerMessage::Error {
                    message: "test".to_string(),
                },
            )
            .await;
        assert_eq!(result.unwrap_err(), "Connection closed");
    }

    #[tokio::test]
    async fn test_battle_assignment() {
        let manager = ConnectionManager::new();
        let conn_id = ConnectionId::new();
        let _receiver = manager.create_connection(conn_id).await;

        let battle_id = Uuid::new_v4();
        manager.set_connection_battle(conn_id, Some(battle_id)).await;
        assert_eq!(
            manager.get_connection(conn_id).await.unwrap().battle_id,
            Some(battle_id)
        );

        manager.set_connection_battle(conn_id, None).await;
        assert!(manager.get_connection(conn_id).await.unwrap().battle_id.is_none());
    }
}
