pub mod eloverblik;
pub mod energidataservice;
pub mod util;

pub use eloverblik::EloverblikProvider;
pub use energidataservice::EnergiDataServiceProvider;
