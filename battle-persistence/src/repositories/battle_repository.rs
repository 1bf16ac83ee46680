use async_trait::async_trait;
use battle_core::{add_player, apply_patch, new_battle};
use battle_types::{
    Battle, BattleError, BattleId, BattleMode, BattlePatch, BattleStatus, Challenge, Player,
};
use chrono::{DateTime, Utc};
use futures_util::stream::{self, BoxStream, StreamExt};
use sea_orm::{
    ActiveValue, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::entities::{battles, prelude::*};
use crate::feed::ChangeFeed;
use crate::store::{MatchStore, Subscription};

/// Battles stored as JSON documents in a relational table.
pub struct SqlMatchStore {
    db: DatabaseConnection,
    feed: ChangeFeed,
    // Serialises read-modify-write so concurrent merges never lose a patch
    write_lock: Mutex<()>,
}

impl SqlMatchStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            feed: ChangeFeed::new(),
            write_lock: Mutex::new(()),
        }
    }

    fn model_to_battle(model: &battles::Model) -> Result<Battle, BattleError> {
        serde_json::from_str(&model.document).map_err(BattleError::store)
    }

    async fn find_model(&self, battle_id: BattleId) -> Result<battles::Model, BattleError> {
        Battles::find_by_id(battle_id.to_string())
            .one(&self.db)
            .await
            .map_err(BattleError::store)?
            .ok_or(BattleError::NotFound { battle_id })
    }

    async fn save(&self, existing: battles::Model, battle: &Battle) -> Result<(), BattleError> {
        let document = serde_json::to_string(battle).map_err(BattleError::store)?;

        let updated = battles::ActiveModel {
            id: ActiveValue::Unchanged(existing.id),
            mode: ActiveValue::Unchanged(existing.mode),
            status: ActiveValue::Set(battle.status.as_str().to_string()),
            document: ActiveValue::Set(document),
            created_at: ActiveValue::Unchanged(existing.created_at),
            updated_at: ActiveValue::Set(Utc::now().into()),
        };

        Battles::update(updated)
            .exec(&self.db)
            .await
            .map_err(BattleError::store)?;
        Ok(())
    }
}

#[async_trait]
impl MatchStore for SqlMatchStore {
    async fn create_match(
        &self,
        mode: BattleMode,
        challenge: Challenge,
        host: Player,
    ) -> Result<BattleId, BattleError> {
        let battle = new_battle(Uuid::new_v4(), mode, challenge, host, Utc::now())?;
        let document = serde_json::to_string(&battle).map_err(BattleError::store)?;

        let model = battles::ActiveModel {
            id: ActiveValue::Set(battle.id.to_string()),
            mode: ActiveValue::Set(battle.mode.as_str().to_string()),
            status: ActiveValue::Set(battle.status.as_str().to_string()),
            document: ActiveValue::Set(document),
            created_at: ActiveValue::Set(battle.created_at.into()),
            updated_at: ActiveValue::Set(Utc::now().into()),
        };

        Battles::insert(model)
            .exec(&self.db)
            .await
            .map_err(BattleError::store)?;

        tracing::debug!("Stored new {} battle {}", battle.mode, battle.id);
        Ok(battle.id)
    }

    async fn join_match(&self, battle_id: BattleId, player: Player) -> Result<(), BattleError> {
        let _guard = self.write_lock.lock().await;

        let model = self.find_model(battle_id).await?;
        let mut battle = Self::model_to_battle(&model)?;
        add_player(&mut battle, player)?;

        self.save(model, &battle).await?;
        self.feed.publish(&battle);
        Ok(())
    }

    async fn subscribe(&self, battle_id: BattleId) -> Result<Subscription, BattleError> {
        self.find_model(battle_id).await?;
        let receiver = self.feed.subscribe(battle_id);
        let current = self.get_match(battle_id).await?;
        Ok(Subscription::new(current, receiver))
    }

    async fn update_match(
        &self,
        battle_id: BattleId,
        patch: BattlePatch,
    ) -> Result<(), BattleError> {
        let _guard = self.write_lock.lock().await;

        let model = self.find_model(battle_id).await?;
        let before = Self::model_to_battle(&model)?;
        let mut battle = before.clone();
        apply_patch(&mut battle, &patch);

        if battle != before {
            self.save(model, &battle).await?;
            self.feed.publish(&battle);
        }
        Ok(())
    }

    async fn list_waiting_matches(
        &self,
        mode: BattleMode,
    ) -> Result<BoxStream<'static, Battle>, BattleError> {
        let models = Battles::find()
            .filter(battles::Column::Status.eq(BattleStatus::Waiting.as_str()))
            .filter(battles::Column::Mode.eq(mode.as_str()))
            .order_by_asc(battles::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(BattleError::store)?;

        let mut waiting = Vec::with_capacity(models.len());
        for model in &models {
            match Self::model_to_battle(model) {
                Ok(battle) if battle.is_joinable() => waiting.push(battle),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable battle {}: {}", model.id, e),
            }
        }

        Ok(stream::iter(waiting).boxed())
    }

    async fn get_match(&self, battle_id: BattleId) -> Result<Battle, BattleError> {
        let model = self.find_model(battle_id).await?;
        Self::model_to_battle(&model)
    }

    async fn prune_finished(&self, finished_before: DateTime<Utc>) -> Result<usize, BattleError> {
        let _guard = self.write_lock.lock().await;

        let models = Battles::find()
            .filter(battles::Column::Status.eq(BattleStatus::Finished.as_str()))
            .all(&self.db)
            .await
            .map_err(BattleError::store)?;

        let mut expired = Vec::new();
        for model in &models {
            match Self::model_to_battle(model) {
                Ok(battle) if battle.end_time.unwrap_or(battle.created_at) < finished_before => {
                    expired.push(battle.id)
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable battle {}: {}", model.id, e),
            }
        }

        if expired.is_empty() {
            return Ok(0);
        }

        let result = Battles::delete_many()
            .filter(battles::Column::Id.is_in(expired.iter().map(|id| id.to_string())))
            .exec(&self.db)
            .await
            .map_err(BattleError::store)?;

        for battle_id in expired {
            self.feed.close(battle_id);
        }
        self.feed.prune();

        Ok(result.rows_affected as usize)
    }
}
