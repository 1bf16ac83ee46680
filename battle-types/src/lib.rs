pub mod battle;
pub mod challenge;
pub mod errors;
pub mod messages;
pub mod player;

// Re-export all types
pub use battle::*;
pub use challenge::*;
pub use errors::*;
pub use messages::*;
pub use player::*;

pub type BattleId = uuid::Uuid;
pub type PlayerId = String;
