// The core module contains all business logic.
// Each feature gets its own submodule.

#[path = "sheets/mod.rs"]
pub mod sheets;

#[path = "tools/mod.rs"]
pub mod tools;

#[path = "retry/retry_policy.rs"]
pub mod retry;

#[path = "config/config_models.rs"]
pub mod config;
