pub mod clock;
pub mod market;
pub mod order;
pub mod state;
pub mod timestamp;

pub use clock::*;
pub use market::*;
pub use order::*;
pub use state::*;
