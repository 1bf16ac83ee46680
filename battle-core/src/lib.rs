pub mod battle_events;
pub mod battle_state;
pub mod catalog;
pub mod clock;
pub mod scoring;
pub mod submission_validation;

// Re-export main components
pub use battle_events::*;
pub use battle_state::*;
pub use catalog::*;
pub use clock::*;
pub use scoring::*;
pub use submission_validation::*;
