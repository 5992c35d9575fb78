pub mod error;
pub mod layer;
pub mod protocol;
pub mod session;
pub mod utils;

pub use error::{Error, Result};
pub use layer::Builder;
pub use session::{FrameSink, LinkAdapter, Pending, Session};
