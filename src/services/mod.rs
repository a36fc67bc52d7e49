pub mod analysis_store; // Prior-analysis reuse with LRU and TTL
pub mod complexity_classifier;
pub mod embedding_service;
pub mod example_retriever;
pub mod llm_service;
pub mod nl2sql_service;
pub mod schema_store;
pub mod sql_generator;
pub mod table_selector;
pub mod vector_index; // Flat L2 index persisted as JSON

#[cfg(test)]
pub mod testing;

pub use analysis_store::*;
pub use complexity_classifier::*;
pub use embedding_service::*;
pub use example_retriever::*;
pub use llm_service::*;
pub use nl2sql_service::*;
pub use schema_store::*;
pub use sql_generator::*;
pub use table_selector::*;
pub use vector_index::*;
