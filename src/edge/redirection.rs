//! Redirection processor: serves the target-edge leg of cross-edge gets.
//!
//! Never reads the cloud, never mutates the directory; it answers from the
//! local cache and piggybacks the outbound victim syncset for the sender.

use super::wrapper::{EdgeCtx, QUEUE_POLL};
use crate::cache::LocalGet;
use crate::concurrency::{PopOutcome, WorkReceiver};
use crate::net::{Envelope, Message};
use crate::types::Hitflag;
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
    debug!(edge = ctx.idx, "redirection processor stopped");
}

async fn handle(ctx: &Arc<EdgeCtx>, env: Envelope) {
    let Message::RedirectedGetReq { key } = env.message else {
        unreachable!("unexpected message at redirection processor");
    };
    let src = env.header.src_idx;

    let _guard = ctx.serial_lock.read(&key).await;
    let outcome = ctx.cache.lock().await.get_redirected(&key);
    let (hitflag, value) = match outcome {
        LocalGet::Hit(value) => (Hitflag::CooperativeHit, Some(value)),
        LocalGet::InvalidHit => (Hitflag::CooperativeInvalid, None),
        LocalGet::Miss => (Hitflag::GlobalMiss, None),
    };

    let victim_syncset = ctx.coop.outbound_syncset_for(src).await;
    ctx.link
        .respond(
            src,
            env.header.seqnum,
            Message::RedirectedGetRsp {
                key,
                value,
                hitflag,
                victim_syncset,
            },
            false,
        )
        .await;
}
