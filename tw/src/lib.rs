pub mod basic_models;
