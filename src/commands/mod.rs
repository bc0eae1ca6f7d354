pub mod dirty;
pub mod label;
pub mod list;
pub mod remove;
pub mod status;
pub mod transfer;

pub use dirty::*;
pub use label::*;
pub use list::*;
pub use remove::*;
pub use status::*;
pub use transfer::*;
