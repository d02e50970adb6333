//! MDM connectors (managed device inventories).

pub mod intune;
pub mod mock;

pub use intune::{IntuneConfig, IntuneConnector};
pub use mock::MockMdmConnector;
