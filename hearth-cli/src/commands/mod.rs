pub mod info;
pub mod query;
pub mod send;
pub mod serve;
