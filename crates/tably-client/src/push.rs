//! Pushing history to a remote node.

use crate::{RemoteClient, Result};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tably_protocol::packfile::{frame_len, PackfileWriter, HEADER_LEN};
use tably_protocol::protocol::{write_updates, ReceivePackReply, RefStatus};
use tably_protocol::{ClosedSetsFinder, Refspec, Update};
use tably_storage::{ObjectStore, ObjectType, RefStore, StorageError, Sum};

/// Recorded when the node's report leaves a ref out.
pub const NO_STATUS: &str = "no status reported";

/// Maps local refs onto remote refs.
///
/// `old_sum` is the remote's advertised value. Refs the remote already
/// holds at the same sum are left out.
pub fn plan_push(
    refs: &dyn RefStore,
    advertised: &[(String, Sum)],
    refspecs: &[Refspec],
) -> Result<Vec<Update>> {
    let remote: HashMap<&str, Sum> = advertised
        .iter()
        .map(|(name, sum)| (name.as_str(), *sum))
        .collect();

    let mut updates = Vec::new();
    for (name, sum) in refs.list("")? {
        let Some((spec, dst)) = refspecs
            .iter()
            .find_map(|spec| spec.transform(&name).map(|dst| (spec, dst)))
        else {
            continue;
        };
        let old = remote.get(dst.as_str()).copied();
        if old == Some(sum) {
            tracing::debug!(dst = %dst, "Remote ref up to date");
            continue;
        }
        let mut update = Update::new(old, Some(sum), name, dst);
        update.force = spec.is_force();
        updates.push(update);
    }
    Ok(updates)
}

/// Writes the next bounded packfile chunk, or `None` once `plan` is
/// drained. A chunk always holds at least one object.
pub fn next_chunk(
    objects: &dyn ObjectStore,
    plan: &mut VecDeque<(ObjectType, Sum)>,
    max_size: usize,
) -> Result<Option<Vec<u8>>> {
    if plan.is_empty() {
        return Ok(None);
    }
    let mut writer = PackfileWriter::new(Vec::new())?;
    while let Some((object_type, sum)) = plan.front().copied() {
        let data = objects
            .get(object_type, &sum)?
            .ok_or_else(|| StorageError::NotFound {
                kind: object_type.as_str(),
                sum: sum.to_hex(),
            })?;
        if writer.bytes_written() > HEADER_LEN
            && writer.bytes_written() + frame_len(data.len()) > max_size
        {
            break;
        }
        writer.write_object(object_type, &data)?;
        plan.pop_front();
    }
    Ok(Some(writer.finish()?))
}

/// Pushes local refs to `remote` through `refspecs`.
pub async fn push(
    remote: &RemoteClient,
    objects: Arc<dyn ObjectStore>,
    refs: Arc<dyn RefStore>,
    refspecs: &[Refspec],
) -> Result<Vec<Update>> {
    let advertised = remote.list_refs().await?;
    let updates = plan_push(refs.as_ref(), &advertised, refspecs)?;
    push_updates(remote, objects, refs, &advertised, updates).await
}

/// Sends `updates` with every object the remote lacks, then records the
/// node's per-ref verdict in each update's `err_msg`.
///
/// Objects travel in chunks of at most `max_packfile_size` bytes, one per
/// request, until the node has what it needs.
pub async fn push_updates(
    remote: &RemoteClient,
    objects: Arc<dyn ObjectStore>,
    refs: Arc<dyn RefStore>,
    advertised: &[(String, Sum)],
    mut updates: Vec<Update>,
) -> Result<Vec<Update>> {
    if updates.is_empty() {
        return Ok(updates);
    }

    let mut seen = HashSet::new();
    let wants: Vec<Sum> = updates
        .iter()
        .filter_map(|u| u.sum)
        .filter(|sum| seen.insert(*sum))
        .collect();

    let mut plan = VecDeque::new();
    if !wants.is_empty() {
        let mut haves = Vec::new();
        for (_, sum) in advertised {
            if objects.exist(ObjectType::Commit, sum)? {
                haves.push(*sum);
            }
        }
        let mut finder = ClosedSetsFinder::new(objects.clone(), refs);
        finder.process(&wants, &haves, true)?;
        plan = finder.object_plan()?;
    }
    tracing::info!(
        remote = %remote.base_url(),
        updates = updates.len(),
        objects = plan.len(),
        "Pushing"
    );

    let max_size = remote.config().max_packfile_size;
    let mut body = Vec::new();
    write_updates(&mut body, &updates)?;
    if let Some(chunk) = next_chunk(objects.as_ref(), &mut plan, max_size)? {
        body.extend_from_slice(&chunk);
    }

    let mut cookie = None;
    let mut requests = 0usize;
    let statuses = loop {
        requests += 1;
        match remote.receive_pack(&body, &mut cookie).await? {
            ReceivePackReply::Report(statuses) => break statuses,
            ReceivePackReply::Continue => {
                // An empty body asks the node to report with what it has.
                body = next_chunk(objects.as_ref(), &mut plan, max_size)?.unwrap_or_default();
                tracing::debug!(request = requests + 1, bytes = body.len(), "Sending more objects");
            }
        }
    };

    apply_statuses(&mut updates, &statuses);
    let rejected = updates.iter().filter(|u| !u.is_ok()).count();
    tracing::info!(requests, rejected, "Push finished");
    Ok(updates)
}

/// Copies each ref's reported outcome onto its update.
pub fn apply_statuses(updates: &mut [Update], statuses: &[RefStatus]) {
    for update in updates.iter_mut() {
        update.err_msg = match statuses.iter().find(|s| s.dst == update.dst) {
            Some(status) => status.err_msg.clone(),
            None => Some(NO_STATUS.to_string()),
        };
    }
}
