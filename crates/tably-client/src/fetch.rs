//! Fetching history from a remote node.

use crate::{RemoteClient, Result};
use std::collections::HashSet;
use std::sync::Arc;
use tably_protocol::{
    is_ancestor_of, reason, NegotiationStats, Negotiator, Refspec, StoreSink, Update,
};
use tably_storage::{Actor, ObjectStore, ObjectType, RefStore, Sum};

/// Reflog action recorded for refs written by fetch.
pub const FETCH_ACTION: &str = "fetch";

/// Rejection recorded when a fetched ref would not fast-forward.
pub const NON_FAST_FORWARD: &str = "non-fast-forward";

/// Result of a fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
    /// Local ref changes; rejected ones carry `err_msg`.
    pub updates: Vec<Update>,
    /// Negotiation counters, all zero when nothing had to be transferred.
    pub stats: NegotiationStats,
}

/// Maps advertised remote refs onto local refs.
///
/// The first matching refspec wins. Refs already holding the advertised
/// sum are left out.
pub fn plan_fetch(
    refs: &dyn RefStore,
    advertised: &[(String, Sum)],
    refspecs: &[Refspec],
) -> Result<Vec<Update>> {
    let mut updates = Vec::new();
    for (name, sum) in advertised {
        let Some((spec, dst)) = refspecs
            .iter()
            .find_map(|spec| spec.transform(name).map(|dst| (spec, dst)))
        else {
            continue;
        };
        let old = refs.get(&dst)?;
        if old == Some(*sum) {
            continue;
        }
        let mut update = Update::new(old, Some(*sum), name.clone(), dst);
        update.force = spec.is_force();
        updates.push(update);
    }
    Ok(updates)
}

/// Points local refs at fetched commits.
///
/// A ref is created when missing, fast-forwarded when the new commit
/// descends from the old one, and otherwise only moved when forced.
pub fn apply_fetch(
    objects: Arc<dyn ObjectStore>,
    refs: &dyn RefStore,
    actor: &Actor,
    updates: &mut [Update],
) -> Result<()> {
    for update in updates.iter_mut() {
        let Some(sum) = update.sum else {
            continue;
        };
        if !objects.exist(ObjectType::Commit, &sum)? {
            update.err_msg = Some(reason::MISSING_COMMIT.to_string());
            continue;
        }

        let message = match update.old_sum {
            None => "storing head",
            Some(old) if is_ancestor_of(objects.clone(), &old, &sum)? => "fast-forward",
            Some(_) if update.force => "forced-update",
            Some(_) => {
                update.err_msg = Some(NON_FAST_FORWARD.to_string());
                continue;
            }
        };

        if !refs.compare_and_swap(&update.dst, update.old_sum, sum)? {
            update.err_msg = Some(reason::STALE.to_string());
            continue;
        }
        refs.append_reflog(
            &update.dst,
            actor.reflog(update.old_sum, Some(sum), FETCH_ACTION, message),
        )?;
        tracing::info!(src = %update.src, dst = %update.dst, sum = %sum, "{}", message);
    }
    Ok(())
}

/// Fetches from `remote` into the local stores.
///
/// With no refspecs, `+heads/*:remotes/<remote_name>/*` is used.
pub async fn fetch(
    remote: &RemoteClient,
    objects: Arc<dyn ObjectStore>,
    refs: Arc<dyn RefStore>,
    remote_name: &str,
    refspecs: &[Refspec],
) -> Result<FetchOutcome> {
    let default = [Refspec::default_fetch(remote_name)];
    let refspecs = if refspecs.is_empty() {
        &default[..]
    } else {
        refspecs
    };

    let advertised = remote.list_refs().await?;
    let mut updates = plan_fetch(refs.as_ref(), &advertised, refspecs)?;

    let mut seen = HashSet::new();
    let mut wants = Vec::new();
    for sum in updates.iter().filter_map(|u| u.sum) {
        if seen.insert(sum) && !objects.exist(ObjectType::Commit, &sum)? {
            wants.push(sum);
        }
    }

    let tips: Vec<Sum> = refs.list("")?.into_iter().map(|(_, sum)| sum).collect();
    tracing::info!(
        remote = %remote.base_url(),
        updates = updates.len(),
        wants = wants.len(),
        tips = tips.len(),
        "Fetching"
    );

    let mut transport = remote.upload_pack();
    let mut sink = StoreSink::new(objects.clone());
    let stats = Negotiator::new(objects.clone(), wants, &tips)?
        .start(&mut transport, &mut sink)
        .await?;

    apply_fetch(objects, refs.as_ref(), &remote.config().actor, &mut updates)?;
    Ok(FetchOutcome { updates, stats })
}
