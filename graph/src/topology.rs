use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use log::{debug, trace};
use safecast::TryCastFrom;

use lf_error::*;
use lf_value::Scalar;

use super::operator::{Operator, Slots};
use super::slot::{Direction, Metadata, OperatorId, SlotRef, SlotSpec, Value};

/// The mutable state of a single slot.
#[derive(Clone)]
pub(crate) struct SlotState {
    pub spec: SlotSpec,
    pub upstream: Option<SlotRef>,
    pub value: Option<Value>,
    pub meta: Option<Metadata>,
}

impl SlotState {
    fn new(spec: SlotSpec) -> Self {
        Self {
            spec,
            upstream: None,
            value: None,
            meta: None,
        }
    }

    /// Return `true` if this is an output slot computed by its own operator.
    pub fn is_computed(&self) -> bool {
        self.spec.direction() == Direction::Output && self.upstream.is_none()
    }
}

#[derive(Clone)]
pub(crate) struct Node {
    pub op: Arc<dyn Operator>,
    pub parent: Option<OperatorId>,
    pub children: BTreeSet<OperatorId>,
    pub slots: BTreeMap<String, SlotState>,
}

impl Node {
    /// The names of the output slots which this node's operator computes itself.
    pub fn computed_outputs(&self) -> impl Iterator<Item = &str> {
        self.slots
            .iter()
            .filter(|(_, state)| state.is_computed())
            .map(|(name, _)| name.as_str())
    }

    pub fn inputs(&self) -> impl Iterator<Item = &str> {
        self.slots
            .iter()
            .filter(|(_, state)| state.spec.direction() == Direction::Input)
            .map(|(name, _)| name.as_str())
    }
}

/// Where the data of a slot ultimately comes from, after following its upstream chain.
pub(crate) enum Source<'a> {
    Computed(SlotRef),
    Value(&'a Value),
    Default(Scalar),
    Missing(SlotRef),
}

/// The operators of a graph and the connections between their slots.
///
/// Every mutation is applied to a clone which replaces the original only on success, so a
/// failed mutation leaves the graph unchanged.
#[derive(Clone, Default)]
pub(crate) struct Topology {
    next_id: u64,
    nodes: BTreeMap<OperatorId, Node>,
    listeners: BTreeMap<SlotRef, BTreeSet<SlotRef>>,
}

impl Topology {
    pub fn insert(
        &mut self,
        op: Arc<dyn Operator>,
        parent: Option<OperatorId>,
    ) -> LFResult<OperatorId> {
        let id = OperatorId(self.next_id);

        if let Some(parent) = parent {
            let parent = self
                .nodes
                .get_mut(&parent)
                .ok_or_else(|| not_found!("parent operator {parent}"))?;

            parent.children.insert(id);
        }

        let slots = op
            .schema()
            .iter()
            .map(|spec| (spec.name().to_string(), SlotState::new(spec.clone())))
            .collect();

        debug!("add operator {} as {id}", op.name());

        self.next_id += 1;
        self.nodes.insert(
            id,
            Node {
                op,
                parent,
                children: BTreeSet::new(),
                slots,
            },
        );

        Ok(id)
    }

    /// Remove the given operator and its descendants.
    ///
    /// Returns the surviving slots which lost their upstream connection.
    pub fn remove(&mut self, id: OperatorId) -> LFResult<Vec<SlotRef>> {
        let node = self.node(id)?;
        let parent = node.parent;

        let mut removed = BTreeSet::new();
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            if removed.insert(id) {
                pending.extend(self.node(id)?.children.iter().copied());
            }
        }

        let removed_slots = removed
            .iter()
            .map(|id| {
                self.node(*id)
                    .map(|node| node.slots.keys().map(|name| id.slot(name)).collect::<Vec<_>>())
            })
            .collect::<LFResult<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect::<Vec<_>>();

        for slot in &removed_slots {
            self.detach(slot)?;
        }

        let mut orphans = Vec::new();
        for slot in &removed_slots {
            for listener in self.listeners.remove(slot).unwrap_or_default() {
                if !removed.contains(&listener.operator()) {
                    self.slot_mut(&listener)?.upstream = None;
                    orphans.push(listener);
                }
            }
        }

        for id in &removed {
            if let Some(node) = self.nodes.remove(id) {
                debug!("remove operator {} ({id})", node.op.name());
            }
        }

        if let Some(parent) = parent.and_then(|parent| self.nodes.get_mut(&parent)) {
            parent.children.remove(&id);
        }

        Ok(orphans)
    }

    pub fn ids(&self) -> impl Iterator<Item = OperatorId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn node(&self, id: OperatorId) -> LFResult<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| not_found!("operator {id}"))
    }

    pub fn slot(&self, slot: &SlotRef) -> LFResult<&SlotState> {
        self.node(slot.operator())?
            .slots
            .get(slot.name())
            .ok_or_else(|| not_found!("slot {slot}"))
    }

    fn slot_mut(&mut self, slot: &SlotRef) -> LFResult<&mut SlotState> {
        self.nodes
            .get_mut(&slot.operator())
            .ok_or_else(|| not_found!("operator {}", slot.operator()))?
            .slots
            .get_mut(slot.name())
            .ok_or_else(|| not_found!("slot {slot}"))
    }

    /// The slots which read directly from the given `slot`.
    pub fn listeners(&self, slot: &SlotRef) -> impl Iterator<Item = &SlotRef> {
        self.listeners.get(slot).into_iter().flatten()
    }

    /// Follow the upstream chain of `slot` to the source of its data.
    pub fn source(&self, slot: &SlotRef) -> LFResult<Source<'_>> {
        let mut current = slot.clone();

        loop {
            let state = self.slot(&current)?;

            if let Some(upstream) = &state.upstream {
                current = upstream.clone();
                continue;
            }

            return Ok(match state.spec.direction() {
                Direction::Output => Source::Computed(current),
                Direction::Input => match (&state.value, state.spec.default_value()) {
                    (Some(value), _) => Source::Value(value),
                    (None, Some(default)) => Source::Default(default),
                    (None, None) => Source::Missing(current),
                },
            });
        }
    }

    /// The [`Metadata`] of the array which `slot` carries.
    pub fn metadata(&self, slot: &SlotRef) -> LFResult<Metadata> {
        match self.source(slot)? {
            Source::Computed(output) => self
                .slot(&output)?
                .meta
                .clone()
                .ok_or_else(|| not_ready!("{output} is not ready")),
            Source::Value(value) => value.metadata(),
            Source::Default(scalar) => Err(type_mismatch!("{slot} carries the scalar {scalar}")),
            Source::Missing(input) => Err(not_ready!("{input} has no value or connection")),
        }
    }

    /// The scalar value which `slot` carries.
    pub fn scalar<T: TryCastFrom<Scalar>>(&self, slot: &SlotRef) -> LFResult<T> {
        let scalar = match self.source(slot)? {
            Source::Value(Value::Scalar(scalar)) => *scalar,
            Source::Default(scalar) => scalar,
            Source::Missing(input) => return Err(not_ready!("{input} has no value or connection")),
            Source::Value(Value::Array(..)) | Source::Computed(_) => {
                return Err(type_mismatch!("{slot} carries an array, not a scalar"))
            }
        };

        T::opt_cast_from(scalar).ok_or_else(|| {
            type_mismatch!(
                "{slot} = {scalar} is not a valid {}",
                std::any::type_name::<T>()
            )
        })
    }

    pub fn is_ready(&self, slot: &SlotRef) -> bool {
        match self.source(slot) {
            Ok(Source::Computed(output)) => self
                .slot(&output)
                .map(|state| state.meta.is_some())
                .unwrap_or(false),
            Ok(Source::Value(_)) | Ok(Source::Default(_)) => true,
            Ok(Source::Missing(_)) | Err(_) => false,
        }
    }

    /// Connect `target` to read from `upstream`, replacing any existing value or connection.
    pub fn connect(&mut self, target: &SlotRef, upstream: &SlotRef) -> LFResult<()> {
        if target == upstream {
            return Err(LFError::cycle_detected(format!(
                "cannot connect {target} to itself"
            )));
        }

        let target_spec = self.slot(target)?.spec.clone();
        let upstream_spec = self.slot(upstream)?.spec.clone();
        let target_op = self.node(target.operator())?;
        let upstream_op = self.node(upstream.operator())?;

        let valid = match (target_spec.direction(), upstream_spec.direction()) {
            (Direction::Input, Direction::Output) => true,
            (Direction::Input, Direction::Input) => target_op.parent == Some(upstream.operator()),
            (Direction::Output, Direction::Output) => upstream_op.parent == Some(target.operator()),
            (Direction::Output, Direction::Input) => false,
        };

        if !valid {
            return Err(bad_request!(
                "cannot connect {:?} {target} of {} to {:?} {upstream} of {}",
                target_spec.direction(),
                target_op.op.name(),
                upstream_spec.direction(),
                upstream_op.op.name(),
            ));
        }

        target_spec.check_compatible(&upstream_spec)?;

        if let Ok(meta) = self.metadata(upstream) {
            target_spec.check(&meta)?;
        }

        if self.reaches(target, upstream) {
            return Err(LFError::cycle_detected(format!(
                "connecting {target} to {upstream} would create a cycle"
            )));
        }

        debug!("connect {target} to {upstream}");

        self.detach(target)?;

        let state = self.slot_mut(target)?;
        state.upstream = Some(upstream.clone());
        state.value = None;
        state.meta = None;

        self.listeners
            .entry(upstream.clone())
            .or_default()
            .insert(target.clone());

        Ok(())
    }

    /// Remove the value or connection of `target`.
    pub fn disconnect(&mut self, target: &SlotRef) -> LFResult<()> {
        debug!("disconnect {target}");

        let forwarded = self.detach(target)?.is_some();
        self.slot_mut(target)?.value = None;

        if forwarded && self.slot(target)?.spec.direction() == Direction::Output {
            // the output is computed by its own operator again
            let node = self.node(target.operator())?;
            let inputs = node
                .inputs()
                .map(|name| target.operator().slot(name))
                .collect::<Vec<_>>();

            if inputs.iter().any(|input| self.reaches(target, input)) {
                return Err(LFError::cycle_detected(format!(
                    "disconnecting {target} would create a cycle"
                )));
            }
        }

        Ok(())
    }

    /// Assign a static `value` to the input slot `target`, replacing any connection.
    pub fn set_value(&mut self, target: &SlotRef, value: Value) -> LFResult<()> {
        let spec = &self.slot(target)?.spec;

        if spec.direction() != Direction::Input {
            return Err(bad_request!("cannot assign a value to output {target}"));
        }

        if !value.fits(spec.kind()) {
            return Err(type_mismatch!(
                "cannot assign {value:?} to {:?} slot {target}",
                spec.kind()
            ));
        }

        if let Value::Array(..) = &value {
            spec.check(&value.metadata()?)?;
        }

        trace!("set {target} = {value:?}");

        self.detach(target)?;
        self.slot_mut(target)?.value = Some(value);

        Ok(())
    }

    /// Remove the upstream connection of `target`, if any, and return it.
    fn detach(&mut self, target: &SlotRef) -> LFResult<Option<SlotRef>> {
        let upstream = self.slot_mut(target)?.upstream.take();

        if let Some(upstream) = &upstream {
            if let Some(listeners) = self.listeners.get_mut(upstream) {
                listeners.remove(target);

                if listeners.is_empty() {
                    self.listeners.remove(upstream);
                }
            }
        }

        Ok(upstream)
    }

    /// The slots whose data depends directly on `slot`: its listeners and, for an input,
    /// the outputs its operator computes.
    fn downstream(&self, slot: &SlotRef) -> Vec<SlotRef> {
        let mut next = self.listeners(slot).cloned().collect::<Vec<_>>();

        if let Ok(state) = self.slot(slot) {
            if state.spec.direction() == Direction::Input {
                if let Ok(node) = self.node(slot.operator()) {
                    next.extend(node.computed_outputs().map(|name| slot.operator().slot(name)));
                }
            }
        }

        next
    }

    /// Return `true` if data flows from `from` to `to`.
    fn reaches(&self, from: &SlotRef, to: &SlotRef) -> bool {
        let mut visited = HashSet::new();
        let mut pending = vec![from.clone()];

        while let Some(slot) = pending.pop() {
            if &slot == to {
                return true;
            } else if visited.insert(slot.clone()) {
                pending.extend(self.downstream(&slot));
            }
        }

        false
    }

    /// Every slot downstream of `roots` (inclusive), in topological order.
    fn affected<I: IntoIterator<Item = SlotRef>>(&self, roots: I) -> Vec<SlotRef> {
        fn visit(
            topology: &Topology,
            slot: SlotRef,
            visited: &mut HashSet<SlotRef>,
            order: &mut Vec<SlotRef>,
        ) {
            if visited.insert(slot.clone()) {
                for next in topology.downstream(&slot) {
                    visit(topology, next, visited, order);
                }

                order.push(slot);
            }
        }

        let mut visited = HashSet::new();
        let mut order = Vec::new();
        for root in roots {
            visit(self, root, &mut visited, &mut order);
        }

        order.reverse();
        order
    }

    /// Recompute the metadata of every output downstream of `roots`, in topological order.
    ///
    /// Returns the operators whose output metadata changed.
    pub fn refresh<I>(&mut self, roots: I) -> LFResult<BTreeSet<OperatorId>>
    where
        I: IntoIterator<Item = SlotRef>,
    {
        let mut configured = HashSet::new();
        let mut changed = BTreeSet::new();

        for slot in self.affected(roots) {
            let state = self.slot(&slot)?;

            if state.spec.direction() == Direction::Input {
                if let Ok(meta) = self.metadata(&slot) {
                    state.spec.check(&meta)?;
                }

                continue;
            } else if !state.is_computed() {
                continue;
            }

            let id = slot.operator();
            if !configured.insert(id) {
                continue;
            }

            let node = self.node(id)?;
            let op = node.op.clone();

            let outputs = node
                .computed_outputs()
                .map(String::from)
                .collect::<Vec<_>>();

            let ready = op
                .schema()
                .inputs()
                .filter(|spec| !spec.is_optional())
                .all(|spec| self.is_ready(&id.slot(spec.name())));

            let mut metadata = if ready {
                op.setup_metadata(&Slots::new(self, id)).map_err(|cause| {
                    cause.consume(format!("while configuring {} ({id})", op.name()))
                })?
            } else {
                trace!("{} ({id}) is not ready", op.name());
                BTreeMap::new()
            };

            for name in outputs {
                let meta = metadata.remove(&name);
                let state = self.slot_mut(&id.slot(&name))?;

                if state.meta != meta {
                    trace!("{id}.{name} is now {meta:?}");
                    state.meta = meta;
                    changed.insert(id);
                }
            }

            if let Some(name) = metadata.keys().next() {
                return Err(bad_request!(
                    "{} ({id}) has no computed output {name}",
                    op.name()
                ));
            }
        }

        Ok(changed)
    }
}
