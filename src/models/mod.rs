mod rewards;
mod tasks;
mod users;

pub use rewards::*;
pub use tasks::*;
pub use users::*;
