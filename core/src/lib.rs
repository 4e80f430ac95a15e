pub mod command;
pub mod error;
pub mod feedback;
pub mod macros;
pub mod models;
pub mod rotation;
pub mod schedule;
pub mod service;
pub mod shopping;
pub mod store;

pub use error::{Error, Result};
pub use service::MealPlanService;
