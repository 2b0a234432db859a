pub mod engine;
pub mod format;
pub mod options;

pub use engine::TimerEngine;
pub use options::TimeOptionStore;
