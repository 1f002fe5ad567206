//! Relationship records: endpoints, chain links and reachability.

use super::{peek, CheckContext, CANCEL_CHECK_INTERVAL};
use crate::check::error::Result;
use crate::check::limiter::EntityRange;
use crate::check::summary::RecordType;
use crate::storage::{DegreeKey, RelationshipRecord};
use crate::types::{Direction, NodeId, RelationshipId};

pub(crate) fn check_range(ctx: &CheckContext<'_>, range: &EntityRange) -> Result<()> {
    for raw in range.ids() {
        if raw % CANCEL_CHECK_INTERVAL == 0 {
            ctx.check_cancelled()?;
        }
        let id = RelationshipId(raw);
        let Some(rel) = ctx.owned(RecordType::Relationship, raw, ctx.store.relationship(id))? else {
            continue;
        };
        if !rel.in_use {
            continue;
        }
        ctx.state.counts.add_relationship(rel.rel_type);
        if !ctx.store.tokens().has_type(rel.rel_type) {
            ctx.report(RecordType::Relationship, raw, || {
                format!("unknown relationship type {}", rel.rel_type)
            });
        }
        let src_ok = check_endpoint(ctx, &rel, rel.src, "source")?;
        let dst_ok = rel.is_loop() || check_endpoint(ctx, &rel, rel.dst, "target")?;
        check_next(ctx, &rel, rel.src, rel.src_next, "source")?;
        if rel.is_loop() {
            if rel.dst_next.is_some() {
                ctx.report(RecordType::Relationship, raw, || {
                    "self-loop is linked through its target chain".into()
                });
            }
        } else {
            check_next(ctx, &rel, rel.dst, rel.dst_next, "target")?;
        }
        if ctx.full {
            check_reachable(ctx, &rel, src_ok, dst_ok);
            if ctx.flags.check_counts {
                tally_degrees(ctx, &rel);
            }
        }
    }
    Ok(())
}

/// Returns whether the endpoint is a live node.
fn check_endpoint(
    ctx: &CheckContext<'_>,
    rel: &RelationshipRecord,
    node: NodeId,
    side: &'static str,
) -> Result<bool> {
    if node.0 >= ctx.high.nodes {
        ctx.report(RecordType::Relationship, rel.id.0, || {
            format!("{side} node {node} is beyond high id {}", ctx.high.nodes)
        });
        return Ok(false);
    }
    match peek(ctx.store.node(node))? {
        Some(record) if record.in_use => Ok(true),
        Some(_) => {
            ctx.report(RecordType::Relationship, rel.id.0, || {
                format!("{side} node {node} is not in use")
            });
            Ok(false)
        }
        None => Ok(false),
    }
}

fn check_next(
    ctx: &CheckContext<'_>,
    rel: &RelationshipRecord,
    node: NodeId,
    next: Option<RelationshipId>,
    side: &'static str,
) -> Result<()> {
    let Some(next) = next else {
        return Ok(());
    };
    if next.0 >= ctx.high.relationships {
        ctx.report(RecordType::Relationship, rel.id.0, || {
            format!("{side} chain next {next} is beyond high id {}", ctx.high.relationships)
        });
        return Ok(());
    }
    let Some(following) = peek(ctx.store.relationship(next))? else {
        return Ok(());
    };
    if !following.in_use {
        ctx.report(RecordType::Relationship, rel.id.0, || {
            format!("{side} chain next {next} is not in use")
        });
    } else if !following.involves(node) {
        ctx.report(RecordType::Relationship, rel.id.0, || {
            format!("{side} chain next {next} does not involve node {node}")
        });
    }
    Ok(())
}

/// Every relationship must have been reached by the chain walk of each live
/// endpoint. Only meaningful once all node ranges were walked.
fn check_reachable(ctx: &CheckContext<'_>, rel: &RelationshipRecord, src_ok: bool, dst_ok: bool) {
    if src_ok && !ctx.state.reached_from_src.get(rel.id.0) {
        ctx.report(RecordType::Relationship, rel.id.0, || {
            format!("not reachable from the chain of source node {}", rel.src)
        });
    }
    if !rel.is_loop() && dst_ok && !ctx.state.reached_from_dst.get(rel.id.0) {
        ctx.report(RecordType::Relationship, rel.id.0, || {
            format!("not reachable from the chain of target node {}", rel.dst)
        });
    }
}

fn tally_degrees(ctx: &CheckContext<'_>, rel: &RelationshipRecord) {
    let add = |node: NodeId, direction: Direction| {
        if ctx.state.dense_nodes.get(node.0) {
            ctx.state.degrees.add(DegreeKey {
                node,
                rel_type: rel.rel_type,
                direction,
            });
        }
    };
    if rel.is_loop() {
        add(rel.src, Direction::Loop);
    } else {
        add(rel.src, Direction::Outgoing);
        add(rel.dst, Direction::Incoming);
    }
}
