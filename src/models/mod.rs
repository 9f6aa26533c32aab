pub mod connection;
pub mod contact;
pub mod event;
pub mod message;
