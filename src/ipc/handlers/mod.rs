pub mod core;
pub mod duplicates;
pub mod importer;
pub mod ingest;
pub mod records;
pub mod staging;
