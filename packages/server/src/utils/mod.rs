pub mod hash;
pub mod http;
pub mod jwt;
