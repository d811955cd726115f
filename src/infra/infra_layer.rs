// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

#[path = "google/mod.rs"]
pub mod google;

#[cfg(test)]
#[path = "memory/in_memory_sheets.rs"]
pub mod memory;
