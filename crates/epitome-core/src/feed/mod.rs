mod fetcher;
mod models;
mod parser;

pub use fetcher::{validate_feed_url, FeedFetcher, FeedProvider};
pub use models::{Destination, DestinationId, FeedItem, FetchedFeed, NewSource, Publication, Source};
pub use parser::parse_feed;
