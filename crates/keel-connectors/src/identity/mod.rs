//! Identity provider connectors (single sign-on).

pub mod azure_ad;
pub mod mock;

pub use azure_ad::{AzureAdConfig, AzureAdProvider};
pub use mock::MockIdentityProvider;
