//! Configuration reader (C2): tenants, API keys, routes, cache policies, and
//! block rules, as read by the data plane. The admin CRUD surface, schema
//! migrations, and seeding that populate the real backing store are
//! explicitly out of scope; this crate only defines the read contract and
//! an in-memory fixture implementation of it.

pub mod error;
pub mod models;
pub mod reader;

pub use error::ConfigError;
pub use models::{
    ApiKey, ApiKeyId, ApiKeyStatus, BlockReason, BlockRule, CachePolicy, PolicyId, Route, RouteId,
    Tenant, TenantId,
};
pub use reader::{ConfigReader, StaticConfigReader};
