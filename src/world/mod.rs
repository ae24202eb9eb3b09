pub mod host;
pub mod position;
pub mod sim;
pub mod time;
pub mod timers;
