pub mod cfg;
pub mod lower;
pub mod lower_error;
pub mod step;
