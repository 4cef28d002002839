pub mod core;
pub mod directory;
pub mod events;
pub mod lookup;
pub mod results;
