pub mod database;
pub mod entities;
pub mod feed;
pub mod identity;
pub mod repositories;
pub mod traits;
