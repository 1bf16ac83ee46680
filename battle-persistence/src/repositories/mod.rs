pub mod battle_repository;

pub use battle_repository::SqlMatchStore;
