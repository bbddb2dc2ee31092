pub mod clip;
pub mod embedding;
