pub mod chains_api;

pub use chains_api::{create_chains_router, ChainsApiState};
