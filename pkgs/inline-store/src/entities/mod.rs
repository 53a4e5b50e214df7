//! Sea-ORM entities for inline-store

pub mod messages;
pub mod reactions;

pub use messages::Entity as Message;
pub use reactions::Entity as Reaction;
