pub mod bootstrap;
pub mod output;
pub mod pairing;
pub mod process;
pub mod session;

pub use output::{OutputBuffer, OutputWatcher};
pub use session::ShellSession;
