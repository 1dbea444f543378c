use std::collections::{HashSet, VecDeque};

use log::{debug, trace};

use lf_error::*;
use lf_region::Region;

use super::operator::Slots;
use super::slot::{Direction, SlotRef};
use super::topology::Topology;

/// Propagate each dirty `(slot, region)` pair downstream, breadth-first.
///
/// A dirty region flows unchanged from a slot to its listeners. At an input slot, the
/// operator maps it onto its own outputs with [`crate::Operator::propagate_dirty`].
pub(crate) fn propagate<I>(topology: &Topology, dirty: I) -> LFResult<()>
where
    I: IntoIterator<Item = (SlotRef, Region)>,
{
    let mut visited = HashSet::new();
    let mut queue = dirty.into_iter().collect::<VecDeque<_>>();

    while let Some((slot, region)) = queue.pop_front() {
        if !visited.insert((slot.clone(), region.clone())) {
            continue;
        }

        trace!("{region} of {slot} is dirty");

        queue.extend(
            topology
                .listeners(&slot)
                .map(|listener| (listener.clone(), region.clone())),
        );

        if topology.slot(&slot)?.spec.direction() != Direction::Input {
            continue;
        }

        let id = slot.operator();
        let op = topology.node(id)?.op.clone();
        let slots = Slots::new(topology, id);

        let affected = op
            .propagate_dirty(&slots, slot.name(), &region)
            .map_err(|cause| {
                cause.consume(format!("while propagating a dirty {region} of {slot}"))
            })?;

        for (output, region) in affected {
            let output = id.slot(output);
            let state = topology.slot(&output)?;

            if state.is_computed() {
                queue.push_back((output, region));
            } else if state.spec.direction() == Direction::Output {
                // a forwarded output is dirtied by way of its upstream
                debug!("{} reported its forwarded output {output} as dirty", op.name());
            } else {
                return Err(bad_request!(
                    "{} cannot report its input {output} as dirty",
                    op.name()
                ));
            }
        }
    }

    Ok(())
}
