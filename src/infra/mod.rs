pub mod cache;
pub mod http;
pub mod omdb;
pub mod tmdb;
pub mod tvdb;
