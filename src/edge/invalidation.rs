//! Invalidation processor: flips local copies stale on behalf of a writer.

use super::wrapper::{EdgeCtx, QUEUE_POLL};
use crate::concurrency::{PopOutcome, WorkReceiver};
use crate::net::{Envelope, Message};
use std::sync::Arc;
use tracing::debug;

pub async fn run(ctx: Arc<EdgeCtx>, mut rx: WorkReceiver<Envelope>) {
    loop {
        match rx.pop(QUEUE_POLL).await {
            PopOutcome::Item(env) => handle(&ctx, env).await,
            PopOutcome::Timeout => {
                if !ctx.is_running() {
                    break;
                }
            }
            PopOutcome::Closed => break,
        }
    }
    debug!(edge = ctx.idx, "invalidation processor stopped");
}

async fn handle(ctx: &Arc<EdgeCtx>, env: Envelope) {
    let Message::InvalidationReq { key } = env.message else {
        unreachable!("unexpected message at invalidation processor");
    };

    // The validity flip is atomic under the cache lock alone. Taking the
    // key's serializability lock here would close a wait cycle with a
    // local reader that is itself waiting on the writer's edge (reader
    // holds shared lock -> redirected get -> writer holds its own write
    // lock -> this invalidation), so it must not be taken.
    let had_copy = ctx.cache.lock().await.invalidate(&key);
    if had_copy {
        ctx.stats.record_invalidation();
        debug!(edge = ctx.idx, key = %key, "local copy invalidated");
    }
    ctx.link
        .respond(
            env.header.src_idx,
            env.header.seqnum,
            Message::InvalidationRsp { key },
            false,
        )
        .await;
}
