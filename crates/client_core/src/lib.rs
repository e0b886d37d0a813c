//! Client side of the recruitment portal: a typed HTTP client, the session
//! state machine, company branding, and freshness-gated collections.

pub mod error;
pub mod fetch;
pub mod freshness;
pub mod remote;
pub mod session;
pub mod store;
pub mod theme;

pub use error::{ClientError, SessionError};
pub use fetch::{CollectionSource, FetchController, FetchState};
pub use freshness::{Clock, FreshnessPolicy, ManualClock, SystemClock};
pub use remote::{ApplicationsSource, BearerToken, JobsSource, PortalClient};
pub use session::Session;
pub use store::{PortalStore, StoreConfig};
pub use theme::Branding;
