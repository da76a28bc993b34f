pub mod broadcast;
pub mod connections;
pub mod handler;
pub mod messages;
