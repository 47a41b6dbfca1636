pub mod chat;
pub mod events;
pub mod images;
pub mod jobs;
pub mod providers;
