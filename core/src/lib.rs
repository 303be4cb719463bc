pub mod db;
pub mod error;
pub mod ingredient_import;
pub mod membership;
pub mod models;
pub mod service;
pub mod shopping_list;
