pub mod collection;
pub mod download;
pub mod event;
pub mod image;
pub mod job;
pub mod shared;
