pub mod immobilienscout;
pub mod traits;
pub mod types;

pub use immobilienscout::{ImmobilienScoutConfig, ImmobilienScoutProvider};
pub use traits::ListingProvider;
pub use types::FilterCriteria;
