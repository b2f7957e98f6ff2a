pub mod auth;
pub mod connection;
pub mod logging;
pub mod tunnel;

pub use auth::*;
pub use connection::*;
pub use logging::*;
pub use tunnel::*;
