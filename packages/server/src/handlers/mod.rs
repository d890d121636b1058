pub mod admin_jobs;
pub mod collections;
pub mod downloads;
pub mod events;
pub mod images;
