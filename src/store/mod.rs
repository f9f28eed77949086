//! Durable side-table of question context, id-aligned with the vector
//! index.

mod metadata;

pub use metadata::{
    MetadataError, MetadataResult, MetadataStore, QuestionRecord, SourceRecord, SourceType,
};
