pub mod catalog;
pub mod chat;
pub mod events;
pub mod history;
pub mod images;
pub mod models;
pub mod selection;
pub mod uploads;
