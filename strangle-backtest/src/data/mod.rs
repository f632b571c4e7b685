pub mod calendar;
pub mod loader;
pub mod types;

pub use loader::{DataLoader, LoaderError};
pub use types::{Bar, OptionType};
