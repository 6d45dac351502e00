pub mod codec;
pub mod database;
pub mod entities;
pub mod rows;
pub mod schema;
