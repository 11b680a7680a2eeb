pub mod client;
pub mod context;
pub mod directory;
pub mod presence;
pub mod profile;
pub mod registry;
pub mod session;
pub mod timeline;
pub mod traits;
