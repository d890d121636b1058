pub mod collection;
pub mod dead_letter_job;
pub mod download_token;
pub mod image;
pub mod worker_job;
