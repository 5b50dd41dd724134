pub mod context;
pub mod plan;
pub mod procedure;
pub mod trace;
