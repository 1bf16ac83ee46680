pub use super::battles::Entity as Battles;
