pub mod config;
pub mod daemon;
pub mod helpers;
pub mod history;
pub mod pin;
pub mod remind;
pub mod session;
pub mod simulate;
