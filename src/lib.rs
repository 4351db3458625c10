pub mod banner;
pub mod client;
pub mod consts;
pub mod events;
pub mod hook;
pub mod logging;
pub mod prefs;
pub mod protocol;
pub mod server;
pub mod store;
