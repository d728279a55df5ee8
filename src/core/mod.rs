pub mod events;
pub mod manager;
pub mod model;
pub mod probe;
pub mod selection;
pub mod store;
