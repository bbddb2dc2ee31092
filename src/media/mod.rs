pub mod ffmpeg;
pub mod frames;
