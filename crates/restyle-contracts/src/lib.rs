pub mod events;
pub mod interpret;
pub mod prefs;
pub mod session;
pub mod wizard;
