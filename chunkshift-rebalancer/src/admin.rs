//! Admin control-plane interface
//!
//! The privileged commands the drain needs: authentication, balancer state
//! and single-chunk moves.

use bson::{Bson, Document};
use chunkshift_core::{AdminError, AuthError, Credentials, Namespace, ShardId, ShardKey};

/// Positive acknowledgement of a chunk move
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveAck {
    /// Server-side duration of the move, when reported
    pub millis: Option<i64>,
}

/// Admin client trait for dependency injection
#[async_trait::async_trait]
pub trait AdminClient: Send + Sync {
    /// Authenticate; must succeed before any other call
    async fn authenticate(&self, credentials: &Credentials) -> Result<(), AuthError>;

    /// Whether the automatic balancer is currently enabled
    async fn is_balancer_enabled(&self) -> Result<bool, AdminError>;

    /// Move the chunk `[min, max)` of `namespace` onto `to`
    ///
    /// Returns once the cluster has completed or rejected the move.
    async fn move_chunk(
        &self,
        namespace: &Namespace,
        min: &ShardKey,
        max: &ShardKey,
        to: &ShardId,
    ) -> Result<MoveAck, AdminError>;
}

/// Interpret a raw command reply strictly
///
/// Only a numeric or boolean `ok` equal to 1 acknowledges the command. A
/// missing `ok`, any other value, or a reply without a document at all is
/// a failure.
pub fn ack_from_reply(reply: Option<&Document>) -> Result<MoveAck, AdminError> {
    let reply =
        reply.ok_or_else(|| AdminError::no_acknowledgement("no reply to moveChunk"))?;

    let ok = match reply.get("ok") {
        Some(Bson::Double(v)) => *v == 1.0,
        Some(Bson::Int32(v)) => *v == 1,
        Some(Bson::Int64(v)) => *v == 1,
        Some(Bson::Boolean(v)) => *v,
        _ => false,
    };

    if ok {
        let millis = match reply.get("millis") {
            Some(Bson::Int32(v)) => Some(i64::from(*v)),
            Some(Bson::Int64(v)) => Some(*v),
            _ => None,
        };
        return Ok(MoveAck { millis });
    }

    let code = reply
        .get_str("codeName")
        .map(str::to_string)
        .or_else(|_| reply.get_i32("code").map(|c| c.to_string()))
        .unwrap_or_else(|_| AdminError::NO_ACKNOWLEDGEMENT.to_string());
    let message = reply
        .get_str("errmsg")
        .map(str::to_string)
        .unwrap_or_else(|_| reply.to_string());

    Err(AdminError::new(code, message))
}
