pub mod engine;
pub mod report;
pub mod sources;
pub mod verify;
