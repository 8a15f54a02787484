//! Client
//!
//! Pipeline-side connection to a pipehub relay. A pipeline connects,
//! registers its `uuid` with a `graph` message, reports progress with
//! further messages, and receives events the bridge addressed to it.
//!
//! ```no_run
//! # async fn run() -> Result<(), pipehub_client::ClientError> {
//! use pipehub_client::{MessageKind, PipelineClient};
//! use serde_json::json;
//!
//! let mut client = PipelineClient::connect("127.0.0.1:9000").await?;
//! client.register("abc", json!({ "nodes": [] })).await?;
//! client.send_message(&MessageKind::Status, json!({ "progress": 0.5 })).await?;
//!
//! while let Some(event) = client.recv().await? {
//!     // handle event
//! #   let _ = event;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;

pub use client::PipelineClient;
pub use error::ClientError;
pub use pipehub_proto::MessageKind;
