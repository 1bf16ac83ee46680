use battle_core::BattleEvent;
use battle_types::{
    BattleError, BattleId, BattleMode, ClientMessage, Player, PlayerId, PlayerProfile,
    ServerMessage,
};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::lobby::BattleLobby;
use crate::sync::{BattleSession, SessionUpdate};
use crate::websocket::connection::{ConnectionId, ConnectionManager};

/// Translate what a session saw into what the client is told.
///
/// Submissions and timeouts already show up in the next snapshot.
pub fn session_update_message(update: SessionUpdate) -> Option<ServerMessage> {
    match update {
        SessionUpdate::Snapshot {
            battle,
            countdown_remaining,
            seconds_remaining,
        } => Some(ServerMessage::BattleUpdate {
            battle,
            countdown_remaining,
            seconds_remaining,
        }),
        SessionUpdate::Event(event) => match event {
            BattleEvent::PlayerJoined { player, .. } => Some(ServerMessage::PlayerJoined { player }),
            BattleEvent::CountdownStarted { seconds, .. } => {
                Some(ServerMessage::CountdownStarted { seconds })
            }
            BattleEvent::BattleStarted {
                time_limit_seconds, ..
            } => Some(ServerMessage::BattleStarted { time_limit_seconds }),
            BattleEvent::BattleFinished {
                winner, standings, ..
            } => Some(ServerMessage::BattleFinished { winner, standings }),
            BattleEvent::PlayerSubmitted { .. } | BattleEvent::PlayerTimedOut { .. } => None,
        },
    }
}

#[derive(Clone)]
pub struct MessageHandler {
    connection_id: ConnectionId,
    connection_manager: Arc<ConnectionManager>,
    lobby: Arc<BattleLobby>,
    session: Arc<Mutex<Option<BattleSession>>>,
}

impl MessageHandler {
    pub fn new(
        connection_id: ConnectionId,
        connection_manager: Arc<ConnectionManager>,
        lobby: Arc<BattleLobby>,
    ) -> Self {
        Self {
            connection_id,
            connection_manager,
            lobby,
            session: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn handle_message(&self, message: ClientMessage) -> Result<(), String> {
        // Update connection activity
        self.connection_manager
            .update_activity(self.connection_id)
            .await;

        match message {
            ClientMessage::Identify {
                player_id,
                display_name,
                avatar_ref,
            } => self.handle_identify(player_id, display_name, avatar_ref).await,
            ClientMessage::CreateBattle { mode } => self.handle_create_battle(mode).await,
            ClientMessage::JoinBattle { battle_id } => self.handle_join_battle(battle_id).await,
            ClientMessage::WatchBattle { battle_id } => self.handle_watch_battle(battle_id).await,
            ClientMessage::ListBattles { mode } => self.handle_list_battles(mode).await,
            ClientMessage::SubmitSolution { code } => self.handle_submit_solution(code).await,
            ClientMessage::LeaveBattle => self.handle_leave_battle().await,
            ClientMessage::Heartbeat => self.handle_heartbeat().await,
        }
    }

    pub async fn handle_disconnect(&self) {
        info!("Handling disconnect for connection {}", self.connection_id);

        // The player stays in the battle document; the timer settles their result
        if let Some(session) = self.session.lock().await.take() {
            info!(
                "Connection {} stopped watching battle {}",
                self.connection_id,
                session.battle_id()
            );
        }
    }

    async fn handle_identify(
        &self,
        player_id: Option<PlayerId>,
        display_name: String,
        avatar_ref: Option<String>,
    ) -> Result<(), String> {
        let profile = PlayerProfile {
            id: player_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            display_name,
            avatar_ref,
        };

        if let Err(e) = battle_core::validate_player(&Player::from(profile.clone())) {
            return self.send_battle_error(e).await;
        }

        match self
            .connection_manager
            .identify_connection(self.connection_id, profile.clone())
            .await
        {
            Ok(()) => {
                info!(
                    "Connection {} identified as {}",
                    self.connection_id, profile.id
                );
                self.send_message(ServerMessage::Identified { player: profile })
                    .await
            }
            Err(e) => self.send_error(&e).await,
        }
    }

    async fn handle_create_battle(&self, mode: String) -> Result<(), String> {
        let Some(player) = self.current_player().await? else {
            return self.send_error("Identify before creating a battle").await;
        };
        let mode = match mode.parse::<BattleMode>() {
            Ok(mode) => mode,
            Err(e) => return self.send_battle_error(e).await,
        };

        match self.lobby.create_battle(mode, player).await {
            Ok(battle) => {
                self.send_message(ServerMessage::BattleCreated {
                    battle_id: battle.id,
                })
                .await?;
                self.watch(battle.id).await
            }
            Err(e) => self.send_battle_error(e).await,
        }
    }

    async fn handle_join_battle(&self, battle_id: BattleId) -> Result<(), String> {
        let Some(player) = self.current_player().await? else {
            return self.send_error("Identify before joining a battle").await;
        };

        match self.lobby.join_battle(battle_id, player).await {
            Ok(_) => {
                self.send_message(ServerMessage::BattleJoined { battle_id })
                    .await?;
                self.watch(battle_id).await
            }
            // Rejoining after a reconnect just resumes watching
            Err(BattleError::AlreadyJoined { .. }) => {
                self.send_message(ServerMessage::BattleJoined { battle_id })
                    .await?;
                self.watch(battle_id).await
            }
            Err(e) => self.send_battle_error(e).await,
        }
    }

    async fn handle_watch_battle(&self, battle_id: BattleId) -> Result<(), String> {
        self.watch(battle_id).await
    }

    async fn handle_list_battles(&self, mode: String) -> Result<(), String> {
        let mode = match mode.parse::<BattleMode>() {
            Ok(mode) => mode,
            Err(e) => return self.send_battle_error(e).await,
        };

        match self.lobby.waiting_battles(mode).await {
            Ok(battles) => {
                self.send_message(ServerMessage::WaitingBattles { battles })
                    .await
            }
            Err(e) => self.send_battle_error(e).await,
        }
    }

    async fn handle_submit_solution(&self, code: String) -> Result<(), String> {
        let connection = self
            .connection_manager
            .get_connection(self.connection_id)
            .await
            .ok_or("Connection not found")?;

        let Some(player_id) = connection.player_id() else {
            return self.send_error("Identify before submitting").await;
        };
        let Some(battle_id) = connection.battle_id else {
            return self.send_error("Not in a battle").await;
        };

        match self
            .lobby
            .submit_solution(battle_id, player_id, &code)
            .await
        {
            Ok(outcome) => {
                self.send_message(ServerMessage::SubmissionResult {
                    correct: outcome.correct,
                    points_earned: outcome.points_earned,
                })
                .await
            }
            Err(e) => self.send_battle_error(e).await,
        }
    }

    async fn handle_leave_battle(&self) -> Result<(), String> {
        self.session.lock().await.take();
        self.connection_manager
            .set_connection_battle(self.connection_id, None)
            .await;
        self.send_message(ServerMessage::BattleLeft).await
    }

    async fn handle_heartbeat(&self) -> Result<(), String> {
        // Heartbeat just updates activity (already done in handle_message)
        Ok(())
    }

    /// Replace this connection's battle view with one following `battle_id`.
    async fn watch(&self, battle_id: BattleId) -> Result<(), String> {
        let mut session = self.session.lock().await;
        // Stop the previous view before starting the next one
        session.take();

        let (sender, mut receiver) = mpsc::unbounded_channel();
        let opened = BattleSession::open(
            self.lobby.store(),
            self.lobby.clock(),
            battle_id,
            self.lobby.tick_interval(),
            Some(sender),
        )
        .await;

        let opened = match opened {
            Ok(opened) => opened,
            Err(e) => {
                drop(session);
                return self.send_battle_error(e).await;
            }
        };
        *session = Some(opened);
        drop(session);

        self.connection_manager
            .set_connection_battle(self.connection_id, Some(battle_id))
            .await;

        let connection_manager = self.connection_manager.clone();
        let connection_id = self.connection_id;
        tokio::spawn(async move {
            while let Some(update) = receiver.recv().await {
                let Some(message) = session_update_message(update) else {
                    continue;
                };
                if connection_manager
                    .send_to_connection(connection_id, message)
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        Ok(())
    }

    async fn current_player(&self) -> Result<Option<Player>, String> {
        let connection = self
            .connection_manager
            .get_connection(self.connection_id)
            .await
            .ok_or("Connection not found")?;
        Ok(connection.player.map(Player::from))
    }

    async fn send_message(&self, message: ServerMessage) -> Result<(), String> {
        self.connection_manager
            .send_to_connection(self.connection_id, message)
            .await
    }

    pub async fn send_error(&self, error_message: &str) -> Result<(), String> {
        self.send_message(ServerMessage::Error {
            message: error_message.to_string(),
        })
        .await
    }

    async fn send_battle_error(&self, error: BattleError) -> Result<(), String> {
        if error.is_retryable() {
            warn!("Store error for connection {}: {}", self.connection_id, error);
        }
        self.send_error(&error.to_string()).await
    }
}
