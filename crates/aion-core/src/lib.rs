pub mod events;
pub mod health;
pub mod logging;
pub mod secrets;

pub use events::*;
pub use health::*;
pub use logging::*;
pub use secrets::*;
