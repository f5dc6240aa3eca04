pub mod extraction;
pub mod proxy;
pub mod request;

pub use extraction::*;
pub use proxy::*;
pub use request::*;
