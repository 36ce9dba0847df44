pub mod addr;
pub mod protocol;

pub use self::addr::*;
pub use self::protocol::*;
