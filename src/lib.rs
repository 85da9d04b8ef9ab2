pub mod access_token;
pub mod config;
pub mod hunting;
pub mod output;
