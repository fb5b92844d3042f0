pub mod config;
pub mod error;
pub mod event;
pub mod session;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{Result, RoundtableError};
pub use event::EventBus;
pub use session::{BranchFailure, PendingTask, SessionRecord};
pub use types::*;
