pub mod types;
pub mod protocol;
pub mod codec;
pub mod error;

pub use types::*;
pub use protocol::*;
pub use codec::*;
pub use error::*;
