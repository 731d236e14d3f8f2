//! Channel Namespace
//!
//! Formatting and parsing of the three CRUD channel-name shapes, plus the
//! stable key-sorted JSON serialization view channels embed.

pub mod codec;
pub mod stable_json;

pub use codec::{
    field_channel, parse_channel_resource_query, primary_params, resource_channel, view_channel,
    ChannelResourceQuery, CHANNEL_PREFIX,
};
pub use stable_json::stable_stringify;
