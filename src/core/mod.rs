//! Core business logic abstractions

pub mod cache;
pub mod calendar;
pub mod config;
pub mod error;
pub mod log;
pub mod price;
pub mod service;
pub mod spot;
pub mod tariff;

// Re-export main types for cleaner imports
pub use calendar::{BusinessCalendar, DanishBusinessCalendar};
pub use error::PriceError;
pub use price::{FullPrice, SimplePrice};
pub use service::{PriceService, ServiceOptions};
pub use spot::{PriceArea, SpotPriceSource};
pub use tariff::TariffSource;
