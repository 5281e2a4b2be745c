use serde::{Deserialize, Serialize};

/// Who may enumerate an owner's resources.
///
/// A deployment uses exactly one policy; the two are not interchangeable
/// from a trust-boundary standpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingPolicy {
    /// A registered owner lists its own resources.
    #[default]
    SelfService,
    /// Only the confirming backend lists, for any owner.
    BackendOnly,
}

/// Default capacity of the event broadcast channel.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub listing_policy: ListingPolicy,
    /// Events buffered per subscriber before slow receivers lag.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            listing_policy: ListingPolicy::default(),
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}
