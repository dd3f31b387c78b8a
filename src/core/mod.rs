pub mod dates;
pub mod task;
pub mod view;
