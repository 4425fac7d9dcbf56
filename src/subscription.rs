/// Subscription Engine - `stream(from_height)`
///
/// A three-phase live catch-up protocol, run on a spawned task per
/// subscriber and forwarded to the caller through a bounded channel, the
/// same spawn-task-plus-channel shape the write path's broadcast handlers
/// use for outbound delivery:
///
/// - Phase H (history): drain persisted blocks in batches of `batch_size`
///   via `scan_from`, taken under the shared read lock and re-checked
///   against the live tip between batches so a concurrent writer's progress
///   (or a rollback) is reflected immediately.
/// - Phase L (liquid splice): once the remaining gap is small enough, take
///   the shared read lock once, emit what's left of the log plus the
///   current liquid state as one atomic snapshot, and attach a
///   recent-updates buffer cursor *before releasing that lock* so no event
///   committed after the snapshot can be missed. A height already folded
///   into the log is re-expanded into its original key block and
///   micro-block events when the replay buffer still retains them, rather
///   than emitted as the single folded record.
/// - Phase T (tail): drop buffer events until the one matching the
///   snapshot's last emitted id has been seen, then forward everything
///   after it. A cursor that falls behind the buffer's retained window is
///   reported to the subscriber as `SlowConsumer`, the same terminal signal
///   outbound back-pressure severance uses -- the buffer-layer distinction
///   between "fell behind the ring buffer" and "fell behind the outbound
///   channel" isn't meaningful to the caller.
///
/// Back-pressure: the outbound channel holds at most `back_pressure_buffer_size`
/// items. The last free slot is never used for subscription data -- it is
/// reserved so a `SlowConsumer` error can always be delivered instead of
/// silently stalling the producer.

use crate::codec::Codec;
use crate::error::{RepoError, RepoResult};
use crate::liquid::LiquidState;
use crate::metrics;
use crate::repository::{current_height, Repository};
use crate::storage::Log;
use crate::types::{Height, Update};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::instrument;

impl<L: Log, C: Codec> Repository<L, C> {
    /// Starts a live, resumable subscription beginning at `from_height`
    /// (normalized up to 1). Yields `Err` at most once, as the final item.
    #[instrument(skip(self), fields(from_height))]
    pub fn stream(self: Arc<Self>, from_height: Height) -> ReceiverStream<RepoResult<Update>> {
        let from_height = from_height.max(1);
        let capacity = self.config.back_pressure_buffer_size;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        metrics::ACTIVE_SUBSCRIPTIONS.inc();
        tokio::spawn(async move {
            if let Err(err) = drive(&self, from_height, &tx).await {
                let reason = disconnect_reason(&err);
                metrics::record_disconnect(reason);
                let _ = tx.try_send(Err(err));
            }
            metrics::ACTIVE_SUBSCRIPTIONS.dec();
        });
        ReceiverStream::new(rx)
    }
}

fn disconnect_reason(err: &RepoError) -> &'static str {
    match err {
        RepoError::SlowConsumer => "slow_consumer",
        RepoError::OutOfRange { .. } => "out_of_range",
        _ => "stream_failed",
    }
}

/// Enqueues one event, honoring the reserved back-pressure slot. Returns
/// `true` once the subscription must stop: either the consumer dropped its
/// receiver (clean cancellation) or the channel is down to its last slot
/// and a terminal `SlowConsumer` has been placed there instead.
fn forward(tx: &mpsc::Sender<RepoResult<Update>>, update: Update) -> bool {
    if tx.capacity() <= 1 {
        let _ = tx.try_send(Err(RepoError::SlowConsumer));
        return true;
    }
    match tx.try_send(Ok(update)) {
        Ok(()) => false,
        Err(mpsc::error::TrySendError::Closed(_)) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            let _ = tx.try_send(Err(RepoError::SlowConsumer));
            true
        }
    }
}

async fn drive<L: Log, C: Codec>(
    repo: &Repository<L, C>,
    from_height: Height,
    tx: &mpsc::Sender<RepoResult<Update>>,
) -> RepoResult<()> {
    let tip = repo.height().await?;
    if from_height > tip + 1 {
        return Err(RepoError::OutOfRange { requested: from_height, tip });
    }

    let batch_size = repo.config.batch_size;
    let mut cursor = from_height;

    // Phase H: batches of persisted history, re-checking the live tip
    // between batches so a concurrent writer (or rollback) is reflected.
    // Each batch read is taken under the shared lock so it genuinely
    // participates in the same RW lock as the write path, rather than
    // relying only on RocksDB's own iterator snapshotting.
    loop {
        let batch = {
            let liquid = repo.liquid_read().await;
            let live_height = current_height(&liquid, repo.log())?;
            if live_height.saturating_sub(cursor) as usize <= batch_size {
                break;
            }
            repo.log().scan_from(cursor, batch_size)?
        };
        if batch.is_empty() {
            break;
        }
        for (height, bytes) in batch {
            let block = repo.codec().decode(&bytes)?;
            cursor = height + 1;
            if forward(tx, Update::BlockAppended(block)) {
                return Ok(());
            }
        }
    }

    // Phase L: snapshot the remaining log tail plus liquid state under one
    // shared-lock hold, attaching the buffer cursor before the lock drops.
    let (snapshot, mut buffer_cursor, last_id) = {
        let liquid = repo.liquid_read().await;
        let buffered = repo.buffer.snapshot();
        let snapshot = splice_snapshot(&liquid, repo.log(), repo.codec(), cursor, &buffered)?;
        let last_id = snapshot.last().map(Update::event_id);
        let buffer_cursor = repo.buffer.attach();
        (snapshot, buffer_cursor, last_id)
    };

    for update in snapshot {
        if forward(tx, update) {
            return Ok(());
        }
    }

    // Phase T: drop tail events until the snapshot's last id is seen (no
    // history/liquid means there is nothing to wait for), then forward the rest.
    let mut seen_last_id = last_id.is_none();
    loop {
        let update = match buffer_cursor.recv().await {
            Err(RepoError::LaggedBehind) => return Err(RepoError::SlowConsumer),
            other => other?,
        };
        if !seen_last_id {
            if update.event_id() == last_id.unwrap() {
                seen_last_id = true;
            }
            continue;
        }
        if forward(tx, update) {
            return Ok(());
        }
    }
}

fn splice_snapshot<L: Log, C: Codec>(
    liquid: &LiquidState,
    log: &L,
    codec: &C,
    cursor: Height,
    buffered: &[Update],
) -> RepoResult<Vec<Update>> {
    let tip = current_height(liquid, log)?;
    let mut out = Vec::new();

    // The log holds heights strictly below the liquid key block's height;
    // with no liquid state at all (just after a historical rollback with no
    // subsequent append), the log holds everything up to and including `tip`.
    let persisted_end = match liquid.key_block_height() {
        Some(kb_height) => kb_height,
        None => tip.saturating_add(1),
    };
    let mut h = cursor;
    while h < persisted_end {
        // A height already folded into the log may still have its raw key
        // block and micro-block events sitting in the replay buffer; prefer
        // those so a subscriber sees the same granular sequence a live
        // subscriber would have, falling back to the folded record once the
        // buffer has evicted them.
        if let Some(raw) = raw_events_for_height(buffered, h) {
            out.extend(raw);
            h += 1;
            continue;
        }
        match log.get(h)? {
            Some(bytes) => {
                out.push(Update::BlockAppended(codec.decode(&bytes)?));
                h += 1;
            }
            None => break,
        }
    }

    if let Some(kb) = liquid.key_block() {
        if kb.height >= cursor {
            out.push(Update::BlockAppended(kb.clone()));
        }
        for micro in liquid.micro_blocks() {
            out.push(Update::MicroBlockAppended(micro.clone()));
        }
    }

    Ok(out)
}

/// Finds the raw key block event for `height` in the buffered window, plus
/// every micro-block published on top of it before the next key block, if
/// the key block event is still retained.
fn raw_events_for_height(buffered: &[Update], height: Height) -> Option<Vec<Update>> {
    let start = buffered
        .iter()
        .position(|u| matches!(u, Update::BlockAppended(b) if b.height == height))?;
    let mut out = vec![buffered[start].clone()];
    for update in &buffered[start + 1..] {
        match update {
            Update::MicroBlockAppended(m) if m.parent_block_height == height => {
                out.push(update.clone())
            }
            Update::BlockAppended(_) => break,
            _ => {}
        }
    }
    Some(out)
}
