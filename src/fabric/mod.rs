pub mod bootstrap;
pub mod provider;
pub mod sim;
pub mod types;

pub use self::bootstrap::*;
pub use self::provider::*;
pub use self::sim::*;
pub use self::types::*;
