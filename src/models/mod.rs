pub mod campaign;
pub mod conversation;
pub mod lead;
pub mod message;
pub mod organization;
pub mod user;

pub use campaign::*;
pub use conversation::*;
pub use lead::*;
pub use message::*;
pub use organization::*;
pub use user::*;
