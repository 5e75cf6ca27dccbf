pub mod controller;
pub mod scheduler;
