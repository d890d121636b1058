mod admin_jobs;
mod collections;
mod common;
mod downloads;
mod events;
mod images;
mod transforms;
