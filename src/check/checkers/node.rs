//! Node records and the relationship chains hanging off them.

use smallvec::SmallVec;

use super::{peek, CheckContext, CANCEL_CHECK_INTERVAL};
use crate::check::error::Result;
use crate::check::limiter::EntityRange;
use crate::check::summary::RecordType;
use crate::storage::{NodeRecord, MAX_LABELS};
use crate::types::{LabelId, NodeId};

pub(crate) fn check_range(ctx: &CheckContext<'_>, range: &EntityRange) -> Result<()> {
    for raw in range.ids() {
        if raw % CANCEL_CHECK_INTERVAL == 0 {
            ctx.check_cancelled()?;
        }
        let id = NodeId(raw);
        let Some(node) = ctx.owned(RecordType::Node, raw, ctx.store.node(id))? else {
            continue;
        };
        if !node.in_use {
            continue;
        }
        ctx.state.counts.add_node(&node.labels);
        if node.dense {
            ctx.state.dense_nodes.set(raw);
        }
        check_labels(ctx, &node);
        walk_chain(ctx, &node)?;
    }
    Ok(())
}

fn check_labels(ctx: &CheckContext<'_>, node: &NodeRecord) {
    let tokens = ctx.store.tokens();
    let mut seen: SmallVec<[LabelId; MAX_LABELS]> = SmallVec::new();
    for label in &node.labels {
        if !tokens.has_label(*label) {
            ctx.report(RecordType::Node, node.id.0, || format!("unknown label {label}"));
        } else if seen.contains(label) {
            ctx.report(RecordType::Node, node.id.0, || format!("label {label} listed twice"));
        }
        seen.push(*label);
    }
}

/// Follows the node's relationship chain, marking each relationship as
/// reached from this side. The first problem ends the walk.
fn walk_chain(ctx: &CheckContext<'_>, node: &NodeRecord) -> Result<()> {
    let owner = node.id;
    let mut next = node.first_rel;
    let mut first = true;
    while let Some(rel_id) = next {
        if rel_id.0 >= ctx.high.relationships {
            let what = if first { "first relationship" } else { "relationship chain" };
            ctx.report(RecordType::Node, owner.0, || {
                format!("{what} points at {rel_id}, beyond high id {}", ctx.high.relationships)
            });
            break;
        }
        first = false;
        let Some(rel) = peek(ctx.store.relationship(rel_id))? else {
            break;
        };
        if !rel.in_use {
            ctx.report(RecordType::Node, owner.0, || {
                format!("relationship chain references unused relationship {rel_id}")
            });
            break;
        }
        let Some(following) = rel.next_for(owner) else {
            ctx.report(RecordType::Node, owner.0, || {
                format!("relationship chain references {rel_id}, which does not involve the node")
            });
            break;
        };
        let reached = if rel.src == owner {
            &ctx.state.reached_from_src
        } else {
            &ctx.state.reached_from_dst
        };
        if reached.set(rel_id.0) {
            ctx.report(RecordType::Node, owner.0, || {
                format!("relationship chain revisits {rel_id}")
            });
            break;
        }
        next = following;
    }
    Ok(())
}
