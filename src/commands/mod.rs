pub mod plan;
pub mod schema;
pub mod status;
pub mod verify;
