use anyhow::Result;
use async_trait::async_trait;

use crate::models::Listing;
use crate::providers::types::FilterCriteria;

/// Common trait for all listing providers.
/// The final filter is shared; each provider brings its own fetching and
/// enrichment pipeline.
#[async_trait]
pub trait ListingProvider: Send + Sync {
    /// The filter criteria this provider was constructed with.
    fn criteria(&self) -> &FilterCriteria;

    /// Run the full pipeline and return the listings that match the criteria.
    async fn get_results(&self) -> Result<Vec<Listing>>;

    /// Get the name of the listing source.
    fn source_name(&self) -> &'static str;

    /// The shared final filter, applied last, after enrichment.
    fn filtered_results<'a>(
        &'a self,
        results: Vec<Listing>,
    ) -> Box<dyn Iterator<Item = Listing> + 'a> {
        let criteria = self.criteria();
        Box::new(
            results
                .into_iter()
                .filter(move |listing| criteria.is_relevant(listing)),
        )
    }
}
