pub mod cipher;
pub mod predicate;
