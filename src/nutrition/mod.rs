pub mod math;
mod types;

pub use math::{daily_totals, format_serving, normalize_serving, parse_serving, rescale, sum};
pub use types::{FoodItem, Macros, MealLog, MealType};
