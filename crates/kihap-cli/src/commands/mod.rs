pub mod common;
pub mod conflicts;
pub mod once;
pub mod reset;
pub mod run;
pub mod status;
