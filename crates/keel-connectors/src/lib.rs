//! # keel-connectors
//!
//! External system connectors for Keel: the Microsoft Intune MDM
//! inventory (via Microsoft Graph) and Azure AD single sign-on,
//! built on a shared HTTP client with OAuth2 client-credentials,
//! retry, and rate limiting.

pub mod http;
pub mod identity;
pub mod mdm;
pub mod secure_string;
pub mod traits;

pub use http::{HttpClient, RateLimitConfig};
pub use identity::{AzureAdConfig, AzureAdProvider, MockIdentityProvider};
pub use mdm::{IntuneConfig, IntuneConnector, MockMdmConnector};
pub use secure_string::SecureString;
pub use traits::{
    AuthConfig, ComplianceState, Connector, ConnectorConfig, ConnectorError, ConnectorHealth,
    ConnectorResult, DirectoryUser, IdentityProvider, ManagedDevice, MdmConnector, TokenSet,
};
