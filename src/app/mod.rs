pub mod adb;
pub mod config;
pub mod error;
pub mod home;
pub mod logging;
pub mod models;
pub mod poll;
pub mod shell;
pub mod sleep;
pub mod state;
pub mod store;
pub mod timer;
