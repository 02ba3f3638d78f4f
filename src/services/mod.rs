pub mod agent;
pub mod db;
pub mod embedding;
pub mod index;
pub mod nouns;
pub mod tools;
