pub mod config;
pub mod errors;
pub mod gallery;
pub mod ingestion;
pub mod session;
pub mod views;

#[cfg(test)]
mod testing;
