//! JSON search DSL: parsing, compilation to SQL and paging.

mod compiler;
mod namespace;
mod paging;
mod query;

pub use compiler::{compile, compile_query, SearchSqlQuery, SqlArg};
pub use namespace::{ColumnType, SearchNamespace, ACCOUNT_PROJECTION};
pub use paging::{Paging, DEFAULT_PAGE_SIZE, DEFAULT_SYSTEM_BATCH_SIZE};
pub use query::{FieldCondition, Group, Operator, RangeCondition, SearchQuery, TermCondition};
