//! Platform adapters (Reddit) and the trait the dispatcher talks to.

pub mod reddit;
pub mod traits;

pub use reddit::RedditClient;
pub use traits::{ItemStream, Platform};
