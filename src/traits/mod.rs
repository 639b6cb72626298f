pub mod backend;
pub mod content;
pub mod effect;
pub mod layout;
pub mod listener;

pub use backend::*;
pub use content::*;
pub use effect::*;
pub use layout::*;
pub use listener::*;
