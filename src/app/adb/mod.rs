pub mod client;
pub mod discovery;
pub mod locator;
pub mod parse;
pub mod runner;
pub mod settings;
