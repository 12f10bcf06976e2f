//! Static reference graph of a whole stack tree.
//!
//! The evaluator never needs this graph: it discovers dependencies lazily by
//! awaiting them, and finds cycles as they are closed. The static graph is
//! for looking at a configuration before evaluating it, to render it as a
//! mermaid diagram or list the reference cycles it contains.
//!
//! Edges point from a dependency to the element that reads it.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use petgraph::Direction;
use petgraph::Graph;
use petgraph::graph::NodeIndex;

use crate::addrs::{AbsAddr, Item, ProviderAddr, StackAddr};
use crate::config::StackConfig;
use crate::expr::Expr;

pub struct DependencyGraph {
    graph: Graph<AbsAddr, ()>,
    indices: HashMap<AbsAddr, NodeIndex>,
}

impl DependencyGraph {
    pub fn build(config: &StackConfig) -> Self {
        let mut this = Self {
            graph: Graph::new(),
            indices: HashMap::new(),
        };
        this.add_nodes(&StackAddr::root(), config);
        this.add_edges(&StackAddr::root(), config);
        this
    }

    fn add_nodes(&mut self, stack: &StackAddr, config: &StackConfig) {
        let items = config
            .variables
            .keys()
            .map(|name| Item::InputVariable(name.clone()))
            .chain(config.locals.keys().map(|name| Item::LocalValue(name.clone())))
            .chain(config.outputs.keys().map(|name| Item::OutputValue(name.clone())))
            .chain(config.providers.iter().map(|p| {
                Item::ProviderInstance(ProviderAddr::new(&p.provider_type, &p.name))
            }))
            .chain(config.stacks.keys().map(|name| Item::StackCall(name.clone())))
            .chain(config.components.keys().map(|name| Item::Component(name.clone())))
            .collect::<Vec<_>>();

        for item in items {
            let addr = AbsAddr::new(stack.clone(), item);
            let index = self.graph.add_node(addr.clone());
            self.indices.insert(addr, index);
        }

        for (name, call) in &config.stacks {
            self.add_nodes(&stack.child(name), &call.config);
        }
    }

    fn add_edges(&mut self, stack: &StackAddr, config: &StackConfig) {
        for (name, local) in &config.locals {
            self.link(stack, &local.value, Item::LocalValue(name.clone()));
        }
        for (name, output) in &config.outputs {
            self.link(stack, &output.value, Item::OutputValue(name.clone()));
        }
        for provider in &config.providers {
            let item = Item::ProviderInstance(ProviderAddr::new(&provider.provider_type, &provider.name));
            self.link(stack, &provider.config, item);
        }
        for (name, component) in &config.components {
            let item = Item::Component(name.clone());
            self.link(stack, &component.inputs, item.clone());
            for provider in component.providers.values() {
                self.link(stack, provider, item.clone());
            }
        }

        for (name, call) in &config.stacks {
            let child = stack.child(name);
            let target = AbsAddr::new(stack.clone(), Item::StackCall(name.clone()));

            // The call's inputs feed the nested variables directly; routing
            // them through the call node would make every call look cyclic.
            for variable in call.config.variables.keys() {
                let addr = AbsAddr::new(child.clone(), Item::InputVariable(variable.clone()));
                for reference in call.inputs.references() {
                    self.add_edge(&AbsAddr::new(stack.clone(), reference.item()), &addr);
                }
            }
            for output in call.config.outputs.keys() {
                let addr = AbsAddr::new(child.clone(), Item::OutputValue(output.clone()));
                self.add_edge(&addr, &target);
            }

            self.add_edges(&child, &call.config);
        }
    }

    fn link(&mut self, stack: &StackAddr, expr: &Expr, item: Item) {
        let target = AbsAddr::new(stack.clone(), item);
        for reference in expr.references() {
            self.add_edge(&AbsAddr::new(stack.clone(), reference.item()), &target);
        }
    }

    /// References to undeclared elements are left out; evaluation reports
    /// them.
    fn add_edge(&mut self, from: &AbsAddr, to: &AbsAddr) {
        if let (Some(&a), Some(&b)) = (self.indices.get(from), self.indices.get(to))
            && self.graph.find_edge(a, b).is_none()
        {
            self.graph.add_edge(a, b, ());
        }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, addr: &AbsAddr) -> bool {
        self.indices.contains_key(addr)
    }

    /// Elements `addr` reads directly.
    pub fn dependencies(&self, addr: &AbsAddr) -> Vec<&AbsAddr> {
        self.neighbors(addr, Direction::Incoming)
    }

    /// Elements that read `addr` directly.
    pub fn dependents(&self, addr: &AbsAddr) -> Vec<&AbsAddr> {
        self.neighbors(addr, Direction::Outgoing)
    }

    fn neighbors(&self, addr: &AbsAddr, direction: Direction) -> Vec<&AbsAddr> {
        let Some(&index) = self.indices.get(addr) else {
            return Vec::new();
        };
        let mut acc: Vec<&AbsAddr> = self
            .graph
            .neighbors_directed(index, direction)
            .map(|n| &self.graph[n])
            .collect();
        acc.sort();
        acc
    }

    /// Every group of elements that reference each other in a cycle, each
    /// group sorted, groups in address order.
    pub fn cycles(&self) -> Vec<Vec<AbsAddr>> {
        let mut cycles: Vec<Vec<AbsAddr>> = petgraph::algo::tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1 || self.graph.find_edge(scc[0], scc[0]).is_some())
            .map(|scc| {
                let mut group: Vec<AbsAddr> = scc.into_iter().map(|n| self.graph[n].clone()).collect();
                group.sort();
                group
            })
            .collect();
        cycles.sort();
        cycles
    }
}

impl Display for DependencyGraph {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph LR")?;

        for index in self.graph.node_indices() {
            let name = self.graph[index].to_string().replace('"', "\\\"");
            writeln!(f, "    {:?}[\"{}\"]", index.index(), name)?;
        }

        for edge in self.graph.raw_edges() {
            writeln!(f, "    {:?} --> {:?}", edge.source().index(), edge.target().index())?;
        }

        Ok(())
    }
}
