mod database;
mod destination_repo;
mod retry;
mod source_repo;

pub use database::Database;
pub use destination_repo::DestinationRepository;
pub use source_repo::{Removal, SourceRepository, Subscription};
