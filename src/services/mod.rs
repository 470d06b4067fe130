pub mod catalog;
pub mod gateway;
pub mod player;
pub mod presence;
pub mod remote;
pub mod resolver;
pub mod store;
